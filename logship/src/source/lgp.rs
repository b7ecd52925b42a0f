//! Reader of the legacy text event log layout.
//!
//! A legacy log folder holds a `1Cv8.lgf` dictionary file and `*.lgp` data files whose names
//! sort in creation order. A data file starts with a short header followed by records, each a
//! brace-balanced block such as `{20240105093000,N,{0,0},1,1,...}` separated by `,` and line
//! breaks. Quoted strings inside a record escape quotes by doubling them and may contain braces.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::export_error;
use crate::pipeline::PipelineSettings;
use crate::source::{LogSource, LogSourceFactory};
use crate::types::{Checkpoint, EventRecord};

/// Marker file identifying the legacy layout.
pub const LEGACY_MARKER_FILE: &str = "1Cv8.lgf";

/// Single-file database used by the newer layout.
pub const SQLITE_LOG_FILE: &str = "1Cv8.lgd";

/// Name of the log folder inside a tenant directory.
pub const LOG_FOLDER_NAME: &str = "1Cv8Log";

const DATA_FILE_EXTENSION: &str = "lgp";

const READ_CHUNK_SIZE: usize = 1 << 20;

/// Upper bound of a single read call, slow network shares included.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Returns whether `log_folder` holds a log in the legacy layout.
///
/// A folder with a `1Cv8.lgd` database and no `1Cv8.lgf` uses the newer format.
pub fn is_legacy_log_folder(log_folder: &Path) -> bool {
    log_folder.join(LEGACY_MARKER_FILE).is_file()
}

/// Outcome of scanning one position of a buffer.
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    /// A complete record spans `start..end`.
    Record { start: usize, end: usize },
    /// The buffer ends inside a record.
    Incomplete { start: usize },
    /// Only separators are left.
    Exhausted,
}

fn is_separator(byte: u8) -> bool {
    matches!(byte, b',' | b' ' | b'\t' | b'\r' | b'\n')
}

/// Finds the next record starting at or after `pos`.
fn next_record(buf: &[u8], pos: usize) -> Result<Scan, usize> {
    let Some(start) = (pos..buf.len()).find(|&i| !is_separator(buf[i])) else {
        return Ok(Scan::Exhausted);
    };
    if buf[start] != b'{' {
        return Err(start);
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = start;
    while i < buf.len() {
        match (in_string, buf[i]) {
            (true, b'"') => match buf.get(i + 1) {
                Some(b'"') => i += 1,
                Some(_) => in_string = false,
                None => return Ok(Scan::Incomplete { start }),
            },
            (true, _) => {}
            (false, b'"') => in_string = true,
            (false, b'{') => depth += 1,
            (false, b'}') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Scan::Record { start, end: i + 1 });
                }
            }
            (false, _) => {}
        }
        i += 1;
    }

    Ok(Scan::Incomplete { start })
}

fn parse_timestamp(record: &str) -> Option<NaiveDateTime> {
    let digits = record.get(1..15)?;
    NaiveDateTime::parse_from_str(digits, TIMESTAMP_FORMAT).ok()
}

fn malformed(file_name: &str, offset: u64, description: &'static str) -> ExportError {
    export_error!(
        ErrorKind::MalformedLogData,
        description,
        format!("file {file_name} at offset {offset}")
    )
}

fn unavailable(path: &Path, err: std::io::Error) -> ExportError {
    export_error!(
        ErrorKind::SourceUnavailable,
        "Event log is not accessible",
        format!("{}: {err}", path.display())
    )
}

/// Log source reading the legacy `*.lgp` files of one tenant.
#[derive(Debug, Clone)]
pub struct LgpLogSource {
    folder: PathBuf,
}

impl LgpLogSource {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Lists the data files, oldest first.
    async fn data_files(&self) -> ExportResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.folder)
            .await
            .map_err(|err| unavailable(&self.folder, err))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| unavailable(&self.folder, err))?
        {
            let path = entry.path();
            let is_data_file = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(DATA_FILE_EXTENSION));
            if !is_data_file {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                files.push(name.to_owned());
            }
        }
        files.sort();

        Ok(files)
    }

    /// Scans the records of `file_name` located after `offset`.
    ///
    /// `visit` receives the end offset and the bytes of every complete record and returns
    /// `false` to stop. A trailing incomplete record is tolerated only in the newest file,
    /// where it may still be being written.
    async fn scan_file<F>(
        &self,
        file_name: &str,
        offset: u64,
        newest: bool,
        mut visit: F,
    ) -> ExportResult<()>
    where
        F: FnMut(u64, &[u8]) -> ExportResult<bool> + Send,
    {
        let path = self.folder.join(file_name);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            // Removed by retention between the listing and the open.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(unavailable(&path, err)),
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| unavailable(&path, err))?;

        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut buf_start = offset;
        let mut pos = 0usize;
        let mut in_header = offset == 0;

        loop {
            let read = (&mut file)
                .take(READ_CHUNK_SIZE as u64)
                .read_to_end(&mut buf)
                .await
                .map_err(|err| unavailable(&path, err))?;
            let at_eof = read < READ_CHUNK_SIZE;

            if in_header {
                match buf.iter().position(|&byte| byte == b'{') {
                    Some(first) => {
                        pos = first;
                        in_header = false;
                    }
                    None if at_eof => return Ok(()),
                    None => continue,
                }
            }

            loop {
                match next_record(&buf, pos) {
                    Ok(Scan::Record { start, end }) => {
                        pos = end;
                        if !visit(buf_start + end as u64, &buf[start..end])? {
                            return Ok(());
                        }
                    }
                    Ok(Scan::Exhausted) => {
                        pos = buf.len();
                        break;
                    }
                    Ok(Scan::Incomplete { start }) => {
                        pos = start;
                        break;
                    }
                    Err(at) => {
                        return Err(malformed(
                            file_name,
                            buf_start + at as u64,
                            "Unexpected data between records",
                        ));
                    }
                }
            }

            if at_eof {
                if pos < buf.len() && !newest {
                    return Err(malformed(
                        file_name,
                        buf_start + pos as u64,
                        "Truncated record in a rotated log file",
                    ));
                }
                return Ok(());
            }

            buf.drain(..pos);
            buf_start += pos as u64;
            pos = 0;
        }
    }

    async fn read_records(
        &self,
        from: Option<&Checkpoint>,
        max: usize,
    ) -> ExportResult<Vec<EventRecord>> {
        let files = self.data_files().await?;
        let Some(newest) = files.last().cloned() else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for file_name in &files {
            let offset = match from {
                None => 0,
                Some(cursor) if *file_name < cursor.file_name => continue,
                Some(cursor) if *file_name == cursor.file_name => cursor.file_offset,
                Some(_) => 0,
            };

            self.scan_file(file_name, offset, *file_name == newest, |end, bytes| {
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    malformed(file_name, end, "Record is not valid UTF-8")
                })?;
                let timestamp = parse_timestamp(text)
                    .ok_or_else(|| malformed(file_name, end, "Invalid record timestamp"))?;

                records.push(EventRecord {
                    file_name: file_name.clone(),
                    end_offset: end,
                    timestamp,
                    payload: text.to_owned(),
                });

                Ok(records.len() < max)
            })
            .await?;

            if records.len() >= max {
                break;
            }
        }

        Ok(records)
    }
}

impl LogSource for LgpLogSource {
    async fn read(
        &self,
        from: Option<&Checkpoint>,
        max: usize,
    ) -> ExportResult<Vec<EventRecord>> {
        match tokio::time::timeout(READ_TIMEOUT, self.read_records(from, max)).await {
            Ok(result) => result,
            Err(_) => Err(export_error!(
                ErrorKind::SourceUnavailable,
                "Event log read timed out",
                self.folder.display()
            )),
        }
    }

    async fn oldest_position(&self) -> ExportResult<Option<Checkpoint>> {
        let files = self.data_files().await?;

        Ok(files.into_iter().next().map(|file| Checkpoint::new(file, 0)))
    }

    async fn tail_position(&self) -> ExportResult<Option<Checkpoint>> {
        let files = self.data_files().await?;
        let Some(newest) = files.last() else {
            return Ok(None);
        };

        let mut tail = 0;
        self.scan_file(newest, 0, true, |end, _| {
            tail = end;
            Ok(true)
        })
        .await?;

        Ok(Some(Checkpoint::new(newest.clone(), tail)))
    }
}

/// Opens [`LgpLogSource`]s for tenants using the legacy layout.
#[derive(Debug, Clone, Default)]
pub struct LgpSourceFactory;

impl LogSourceFactory for LgpSourceFactory {
    type Source = LgpLogSource;

    fn is_supported(&self, log_folder: &Path) -> bool {
        is_legacy_log_folder(log_folder)
    }

    fn open(&self, settings: &PipelineSettings) -> ExportResult<LgpLogSource> {
        Ok(LgpLogSource::new(settings.log_folder.clone()))
    }
}
