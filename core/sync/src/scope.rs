//! What a sync pass covers.

use serde::{Deserialize, Serialize};

use offcache_common::BucketName;
use offcache_query::Clause;

/// A bucket, optionally narrowed by a filter the server applies on pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncScope {
    pub bucket: BucketName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Clause>,
}

impl SyncScope {
    pub fn new(bucket: BucketName) -> Self {
        Self {
            bucket,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Clause) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Key the pull mark is stored under. Equal filters give equal keys.
    pub fn fingerprint(&self) -> String {
        self.filter
            .as_ref()
            .map(|filter| filter.to_json().to_string())
            .unwrap_or_default()
    }
}
