//! Per-bucket pull bookkeeping.
//!
//! A pull mark belongs to the scope it was taken under. Asking for the mark
//! under a different scope yields `None`, so the next pull starts over.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use offcache_common::{BucketName, Result};

use crate::db::{now_millis, sql_err, LocalStore};

/// One `bucket_cache` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRecord {
    pub bucket: BucketName,
    /// Fingerprint of the scope the mark was taken under.
    pub scope: String,
    /// Server time of the last fully successful pull, in milliseconds.
    pub last_pull: i64,
    /// Local time the row was written.
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct BucketCache {
    store: Arc<LocalStore>,
}

impl BucketCache {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Server time of the last successful pull under `scope`, `None` before
    /// the first or when the bucket was last pulled under another scope.
    pub fn last_pull(&self, bucket: &BucketName, scope: &str) -> Result<Option<i64>> {
        self.store.read(|conn, _| {
            conn.query_row(
                "SELECT last_pull FROM bucket_cache WHERE bucket = ?1 AND scope = ?2",
                params![bucket.as_str(), scope],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)
        })
    }

    /// Record a successful pull under `scope` at `server_time`, replacing
    /// the mark of any previous scope.
    pub fn record_pull(&self, bucket: &BucketName, scope: &str, server_time: i64) -> Result<()> {
        self.store.write(|conn, _| {
            conn.execute(
                "INSERT INTO bucket_cache (bucket, scope, last_pull, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(bucket) DO UPDATE SET scope = excluded.scope, \
                 last_pull = excluded.last_pull, updated_at = excluded.updated_at",
                params![bucket.as_str(), scope, server_time, now_millis()],
            )
            .map_err(sql_err)?;
            Ok(())
        })
    }

    pub fn remove(&self, bucket: &BucketName) -> Result<bool> {
        self.store.write(|conn, _| {
            let removed = conn
                .execute(
                    "DELETE FROM bucket_cache WHERE bucket = ?1",
                    [bucket.as_str()],
                )
                .map_err(sql_err)?;
            Ok(removed > 0)
        })
    }

    pub fn all(&self) -> Result<Vec<BucketRecord>> {
        self.store.read(|conn, _| {
            let mut stmt = conn
                .prepare(
                    "SELECT bucket, scope, last_pull, updated_at FROM bucket_cache ORDER BY bucket",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(sql_err)?;
            rows.map(|row| {
                let (bucket, scope, last_pull, updated_at) = row.map_err(sql_err)?;
                Ok(BucketRecord {
                    bucket: BucketName::new(bucket)?,
                    scope,
                    last_pull,
                    updated_at,
                })
            })
            .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offcache_crypto::KdfParams;

    fn buckets() -> BucketCache {
        let kdf = KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        BucketCache::new(Arc::new(LocalStore::open_in_memory(None, &kdf).unwrap()))
    }

    #[test]
    fn test_record_pull() {
        let cache = buckets();
        let notes = BucketName::new("notes").unwrap();
        assert_eq!(cache.last_pull(&notes, "").unwrap(), None);

        cache.record_pull(&notes, "", 100).unwrap();
        cache.record_pull(&notes, "", 250).unwrap();
        assert_eq!(cache.last_pull(&notes, "").unwrap(), Some(250));
        assert_eq!(cache.all().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_is_per_scope() {
        let cache = buckets();
        let notes = BucketName::new("notes").unwrap();
        cache.record_pull(&notes, r#"{"kind":"a"}"#, 100).unwrap();
        assert_eq!(cache.last_pull(&notes, r#"{"kind":"a"}"#).unwrap(), Some(100));
        assert_eq!(cache.last_pull(&notes, r#"{"kind":"b"}"#).unwrap(), None);

        cache.record_pull(&notes, r#"{"kind":"b"}"#, 300).unwrap();
        assert_eq!(cache.last_pull(&notes, r#"{"kind":"a"}"#).unwrap(), None);
        let all = cache.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].scope, r#"{"kind":"b"}"#);
        assert_eq!(all[0].last_pull, 300);
    }

    #[test]
    fn test_remove() {
        let cache = buckets();
        let notes = BucketName::new("notes").unwrap();
        cache.record_pull(&notes, "", 1).unwrap();
        assert!(cache.remove(&notes).unwrap());
        assert!(!cache.remove(&notes).unwrap());
        assert_eq!(cache.last_pull(&notes, "").unwrap(), None);
    }
}
