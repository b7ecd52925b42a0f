use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};

/// Parses an IANA time zone name.
pub fn parse_time_zone(name: &str) -> ExportResult<Tz> {
    match name.parse::<Tz>() {
        Ok(tz) => Ok(tz),
        Err(_) => bail!(ErrorKind::ConfigError, "Unknown time zone", name),
    }
}

/// Interprets a naive log timestamp in `tz` and converts it to UTC.
///
/// Ambiguous local times, repeated when clocks go back, resolve to the earliest instant.
/// Local times skipped when clocks go forward are shifted forward by one hour.
pub fn local_to_utc(timestamp: NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&timestamp) {
        LocalResult::Single(local) => local.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = timestamp + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&timestamp))
        }
    }
}
