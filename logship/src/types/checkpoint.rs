use std::fmt;

use serde::{Deserialize, Serialize};

/// Exact resume point in a tenant's log stream.
///
/// Checkpoints order by file first, then by offset. Log files are named so that their
/// lexicographic order is their creation order, which makes the derived ordering the stream
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub file_name: String,
    /// Byte offset right after the last exported record.
    pub file_offset: u64,
}

impl Checkpoint {
    pub fn new(file_name: impl Into<String>, file_offset: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_offset,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_name, self.file_offset)
    }
}
