use serde::{Deserialize, Serialize};

/// Semantic role of a row in a VersionedRecord table (§3).
///
/// `NULL` in the database maps to `Option<RecordType> == None` — a freshly
/// inserted candidate awaiting the Delta Builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Initial = 0,
    Diff = 1,
    Final = 2,
    NonJson = 3,
}

impl RecordType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Initial),
            1 => Some(Self::Diff),
            2 => Some(Self::Final),
            3 => Some(Self::NonJson),
            _ => None,
        }
    }
}

/// The two VersionedRecord tables (§3). Episodes has no `parent_key` column;
/// Metadata does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionedTable {
    Metadata,
    Episodes,
}

impl VersionedTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Episodes => "episodes",
        }
    }
}
