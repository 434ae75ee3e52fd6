//! Per-bucket document operations.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use offcache_common::{BucketName, Error, ObjectId, Result};
use offcache_query::Query;
use offcache_store::{CachedObject, ObjectCache};
use offcache_sync::{Access, Arbiter};

/// Handle to one bucket of an enabled cache.
///
/// Creates and reads run at any time, including during a sync. Updates and
/// deletes are exclusive: they queue behind each other and fail with
/// `Locked` while a sync runs.
#[derive(Debug, Clone)]
pub struct Bucket {
    name: BucketName,
    objects: ObjectCache,
    arbiter: Arc<Arbiter>,
}

impl Bucket {
    pub(crate) fn new(name: BucketName, objects: ObjectCache, arbiter: Arc<Arbiter>) -> Self {
        Self {
            name,
            objects,
            arbiter,
        }
    }

    pub fn name(&self) -> &BucketName {
        &self.name
    }

    /// Create a document under a generated id.
    pub async fn create(&self, payload: Value) -> Result<CachedObject> {
        self.create_with_id(ObjectId::generate(), payload).await
    }

    /// Create a document under `id`.
    ///
    /// # Preconditions
    /// - `payload` is a JSON object
    ///
    /// # Postconditions
    /// - The row is `Dirty` without an ETag until a sync pushes it
    ///
    /// # Errors
    /// - `InvalidInput` if the payload is not an object
    /// - `AlreadyExists` if the bucket holds `id`, tombstoned or not
    pub async fn create_with_id(&self, id: ObjectId, payload: Value) -> Result<CachedObject> {
        ensure_document(&payload)?;
        // The table may have been dropped by a cache clear since this handle
        // was made.
        self.objects.store().create_bucket_table(&self.name)?;
        self.objects.insert(&self.name, &id, &payload)
    }

    /// Read a live document.
    pub async fn read(&self, id: &ObjectId) -> Result<CachedObject> {
        self.objects
            .get(&self.name, id)?
            .filter(|object| !object.deleted)
            .ok_or_else(|| Error::NotFound(format!("Object '{}' in bucket {}", id, self.name)))
    }

    /// Documents matching `query`. Tombstones are included only when the
    /// query asks for them.
    pub async fn query(&self, query: &Query) -> Result<Vec<CachedObject>> {
        self.objects.select(&self.name, query)
    }

    /// Replace the payload of a live document.
    ///
    /// # Errors
    /// - `Locked` while a sync runs
    /// - `NotFound` if the document is missing or tombstoned
    pub async fn update(&self, id: &ObjectId, payload: Value) -> Result<CachedObject> {
        ensure_document(&payload)?;
        let _guard = self.arbiter.acquire(Access::CrudExclusive).await?;
        self.objects.update(&self.name, id, &payload)
    }

    /// Delete one document.
    ///
    /// A soft delete tombstones the row so the next sync removes it
    /// server-side. A hard delete removes the row at once and is never pushed.
    ///
    /// # Errors
    /// - `Locked` while a sync runs
    /// - `NotFound` if there is nothing to delete
    pub async fn delete(&self, id: &ObjectId, soft: bool) -> Result<()> {
        let _guard = self.arbiter.acquire(Access::CrudExclusive).await?;
        if soft {
            self.objects.mark_deleted(&self.name, id)?;
        } else if !self.objects.purge(&self.name, id)? {
            return Err(Error::NotFound(format!(
                "Object '{}' in bucket {}",
                id, self.name
            )));
        }
        debug!("Deleted {}/{} (soft: {})", self.name, id, soft);
        Ok(())
    }

    /// Delete every document matching `query`. Returns how many were
    /// deleted.
    pub async fn delete_all(&self, query: &Query, soft: bool) -> Result<usize> {
        let _guard = self.arbiter.acquire(Access::CrudExclusive).await?;
        let count = if soft {
            self.objects.mark_deleted_matching(&self.name, query)?
        } else {
            self.objects.purge_matching(&self.name, query)?
        };
        debug!("Deleted {} objects from {} (soft: {})", count, self.name, soft);
        Ok(count)
    }
}

fn ensure_document(payload: &Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(Error::InvalidInput(
            "Document payload must be a JSON object".to_string(),
        ))
    }
}
