use chrono::{DateTime, NaiveDateTime, Utc};

use crate::types::Checkpoint;

/// A record as produced by a log source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub file_name: String,
    /// Byte offset right after the record in its file.
    pub end_offset: u64,
    /// Timestamp as written in the log, in the log's local time zone.
    pub timestamp: NaiveDateTime,
    /// Raw record text.
    pub payload: String,
}

impl EventRecord {
    /// Position a sink must commit once this record is durably written.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.file_name.clone(), self.end_offset)
    }
}

/// A record ready to be written to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub file_name: String,
    pub file_offset: u64,
    pub event_time: DateTime<Utc>,
    pub payload: String,
}

impl ExportRecord {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.file_name.clone(), self.file_offset)
    }
}
