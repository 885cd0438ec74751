//! Archived definition record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Bucket;

/// One archived definition.
///
/// Field names follow the stored JSON shape (`defid`, `word`, `definition`,
/// `example`, `written_on`), which is also the shape the upstream API uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    /// Upstream definition id, the sole deduplication key
    #[serde(rename = "defid")]
    pub id: u64,

    /// Defined term, never empty
    #[serde(rename = "word")]
    pub term: String,

    /// Definition text
    #[serde(rename = "definition")]
    pub body: String,

    /// Usage example
    #[serde(rename = "example")]
    pub usage_example: String,

    /// Submission time reported by the source
    #[serde(rename = "written_on")]
    pub submitted_at: DateTime<Utc>,
}

impl Record {
    /// Dictionary bucket this record is filed under.
    pub fn bucket(&self) -> Bucket {
        Bucket::for_term(&self.term)
    }
}
