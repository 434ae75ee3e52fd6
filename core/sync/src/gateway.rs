//! Contract with the remote document service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use offcache_common::{BucketName, ObjectId, Result};
use offcache_query::Clause;

/// A document as the server holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: ObjectId,
    pub payload: Value,
    pub etag: String,
    /// Server time of the last change, in milliseconds.
    pub updated_at: i64,
    /// Server-side tombstone.
    #[serde(default)]
    pub deleted: bool,
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullBatch {
    pub objects: Vec<RemoteObject>,
    /// Server clock at the time of the pull; the next pull asks for changes
    /// after it.
    pub server_time: i64,
}

/// A local change offered to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushDocument {
    pub id: ObjectId,
    pub payload: Value,
    /// ETag the change was based on, `None` for documents the server never
    /// acknowledged.
    pub base_etag: Option<String>,
    pub deleted: bool,
}

/// Per-document answer to a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    Acked {
        id: ObjectId,
        etag: String,
        updated_at: i64,
    },
    /// The server copy moved on since `base_etag`.
    Conflict { id: ObjectId, remote: RemoteObject },
}

impl PushOutcome {
    pub fn id(&self) -> &ObjectId {
        match self {
            PushOutcome::Acked { id, .. } | PushOutcome::Conflict { id, .. } => id,
        }
    }
}

/// Remote side of synchronization.
///
/// Implementations own transport, authentication and status mapping; any
/// non-success answer surfaces as `Error::Remote { status, body }`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch documents of `bucket` changed after `since` (all when `None`),
    /// restricted to `filter` when given. Tombstones are included.
    async fn pull(
        &self,
        bucket: &BucketName,
        since: Option<i64>,
        filter: Option<&Clause>,
    ) -> Result<PullBatch>;

    /// Offer local changes. Every document gets exactly one outcome.
    async fn push(&self, bucket: &BucketName, documents: Vec<PushDocument>)
        -> Result<Vec<PushOutcome>>;
}
