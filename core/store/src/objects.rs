//! Cached objects, one table per bucket.

use std::sync::Arc;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use offcache_common::{BucketName, Error, ObjectId, Result};
use offcache_query::{Document, Query};

use crate::cipher::PayloadCipher;
use crate::db::{now_millis, sql_err, LocalStore};
use crate::schema::{object_context, object_table, quote_ident};

/// Relationship of a cached row to the server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Identical to the server version named by the ETag.
    Clean,
    /// Local change not yet pushed.
    Dirty,
    /// Push in flight.
    Sync,
}

impl SyncState {
    fn to_i64(self) -> i64 {
        match self {
            SyncState::Clean => 0,
            SyncState::Dirty => 1,
            SyncState::Sync => 2,
        }
    }

    fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SyncState::Clean),
            1 => Ok(SyncState::Dirty),
            2 => Ok(SyncState::Sync),
            other => Err(Error::Store(format!("Unknown sync state {}", other))),
        }
    }
}

/// One cached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedObject {
    pub bucket: BucketName,
    pub id: ObjectId,
    pub payload: Value,
    /// Server version token; `None` until the server has seen the document.
    pub etag: Option<String>,
    pub sync_state: SyncState,
    /// Soft-delete mark.
    pub deleted: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document for CachedObject {
    fn body(&self) -> &Value {
        &self.payload
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// A reconciliation step applied by [`ObjectCache::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectWrite {
    /// Replace (or create) the row with the server copy; becomes `Clean`.
    Adopt {
        id: ObjectId,
        payload: Value,
        etag: String,
        updated_at: i64,
    },
    /// Keep the local content but base it on `etag`; stays `Dirty`.
    Rebase { id: ObjectId, etag: String },
    /// The server accepted the local content as `etag`; becomes `Clean`.
    Confirm {
        id: ObjectId,
        etag: String,
        updated_at: i64,
    },
    MarkState { id: ObjectId, state: SyncState },
    /// Remove the row physically.
    Purge { id: ObjectId },
}

const COLUMNS: &str = "id, payload, etag, sync_state, deleted, created_at, updated_at";

/// Typed access to the object tables.
#[derive(Debug, Clone)]
pub struct ObjectCache {
    store: Arc<LocalStore>,
}

impl ObjectCache {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Insert a new local document (`Dirty`, no ETag).
    ///
    /// # Errors
    /// - `AlreadyExists` if the bucket already holds `id`, tombstoned or not
    pub fn insert(&self, bucket: &BucketName, id: &ObjectId, payload: &Value) -> Result<CachedObject> {
        let table = object_table(bucket);
        let now = now_millis();
        let object = CachedObject {
            bucket: bucket.clone(),
            id: id.clone(),
            payload: payload.clone(),
            etag: None,
            sync_state: SyncState::Dirty,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.store.write(|conn, cipher| {
            let sealed = seal_payload(cipher, &table, id, payload)?;
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES (?1, ?2, NULL, ?3, 0, ?4, ?5)",
                    quote_ident(&table),
                    COLUMNS
                ),
                params![id.as_str(), sealed, SyncState::Dirty.to_i64(), now, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Error::AlreadyExists(format!("Object '{}' in bucket {}", id, bucket))
                }
                other => sql_err(other),
            })?;
            Ok(())
        })?;
        debug!("Cached new object {}/{}", bucket, id);
        Ok(object)
    }

    /// Fetch a row, tombstoned or not.
    pub fn get(&self, bucket: &BucketName, id: &ObjectId) -> Result<Option<CachedObject>> {
        self.store.read(|conn, cipher| fetch(conn, cipher, bucket, id))
    }

    /// Replace the payload of a live document and mark it `Dirty`.
    ///
    /// # Errors
    /// - `NotFound` if the row is missing or tombstoned
    pub fn update(&self, bucket: &BucketName, id: &ObjectId, payload: &Value) -> Result<CachedObject> {
        let table = object_table(bucket);
        self.store.write(|conn, cipher| {
            let mut object = live(fetch(conn, cipher, bucket, id)?, bucket, id)?;
            let now = now_millis();
            let sealed = seal_payload(cipher, &table, id, payload)?;
            conn.execute(
                &format!(
                    "UPDATE {} SET payload = ?1, sync_state = ?2, updated_at = ?3 WHERE id = ?4",
                    quote_ident(&table)
                ),
                params![sealed, SyncState::Dirty.to_i64(), now, id.as_str()],
            )
            .map_err(sql_err)?;
            object.payload = payload.clone();
            object.sync_state = SyncState::Dirty;
            object.updated_at = now;
            Ok(object)
        })
    }

    /// Tombstone a live document. The row stays until a sync confirms the
    /// deletion server-side.
    pub fn mark_deleted(&self, bucket: &BucketName, id: &ObjectId) -> Result<()> {
        let table = object_table(bucket);
        self.store.write(|conn, cipher| {
            live(fetch(conn, cipher, bucket, id)?, bucket, id)?;
            tombstone(conn, &table, id.as_str())
        })
    }

    /// Remove a row physically. Returns whether it existed.
    pub fn purge(&self, bucket: &BucketName, id: &ObjectId) -> Result<bool> {
        let table = object_table(bucket);
        self.store.write(|conn, _| {
            let removed = conn
                .execute(
                    &format!("DELETE FROM {} WHERE id = ?1", quote_ident(&table)),
                    [id.as_str()],
                )
                .map_err(sql_err)?;
            Ok(removed > 0)
        })
    }

    /// Every row of the bucket, tombstones included.
    pub fn scan(&self, bucket: &BucketName) -> Result<Vec<CachedObject>> {
        let table = object_table(bucket);
        self.store.read(|conn, cipher| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM {}", COLUMNS, quote_ident(&table)))
                .map_err(sql_err)?;
            let rows = stmt.query_map([], RawObject::from_row).map_err(sql_err)?;
            rows.map(|row| row.map_err(sql_err)?.decode(cipher, bucket, &table))
                .collect()
        })
    }

    /// Documents of the bucket matching `query`.
    pub fn select(&self, bucket: &BucketName, query: &Query) -> Result<Vec<CachedObject>> {
        Ok(query.run(self.scan(bucket)?))
    }

    /// Rows with local changes: `Dirty`, plus `Sync` rows left by an
    /// interrupted push.
    pub fn pending(&self, bucket: &BucketName) -> Result<Vec<CachedObject>> {
        Ok(self
            .scan(bucket)?
            .into_iter()
            .filter(|o| o.sync_state != SyncState::Clean)
            .collect())
    }

    /// Tombstone every live document matching `query`, in one transaction.
    pub fn mark_deleted_matching(&self, bucket: &BucketName, query: &Query) -> Result<usize> {
        let table = object_table(bucket);
        let matched = self.select(bucket, query)?;
        self.store.write(|conn, _| {
            let mut count = 0;
            for object in matched.iter().filter(|o| !o.deleted) {
                tombstone(conn, &table, object.id.as_str())?;
                count += 1;
            }
            Ok(count)
        })
    }

    /// Physically remove every row matching `query`, in one transaction.
    pub fn purge_matching(&self, bucket: &BucketName, query: &Query) -> Result<usize> {
        let table = object_table(bucket);
        let matched = self.select(bucket, query)?;
        self.store.write(|conn, _| {
            let sql = format!("DELETE FROM {} WHERE id = ?1", quote_ident(&table));
            let mut count = 0;
            for object in &matched {
                count += conn.execute(&sql, [object.id.as_str()]).map_err(sql_err)?;
            }
            Ok(count)
        })
    }

    /// Apply reconciliation steps atomically.
    pub fn apply(&self, bucket: &BucketName, writes: &[ObjectWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let table = object_table(bucket);
        let quoted = quote_ident(&table);
        self.store.write(|conn, cipher| {
            for write in writes {
                match write {
                    ObjectWrite::Adopt {
                        id,
                        payload,
                        etag,
                        updated_at,
                    } => {
                        let sealed = seal_payload(cipher, &table, id, payload)?;
                        conn.execute(
                            &format!(
                                "INSERT INTO {q} ({c}) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5) \
                                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, \
                                 etag = excluded.etag, sync_state = excluded.sync_state, \
                                 deleted = 0, updated_at = excluded.updated_at",
                                q = quoted,
                                c = COLUMNS
                            ),
                            params![
                                id.as_str(),
                                sealed,
                                etag,
                                SyncState::Clean.to_i64(),
                                updated_at
                            ],
                        )
                        .map_err(sql_err)?;
                    }
                    ObjectWrite::Rebase { id, etag } => {
                        conn.execute(
                            &format!(
                                "UPDATE {} SET etag = ?1, sync_state = ?2 WHERE id = ?3",
                                quoted
                            ),
                            params![etag, SyncState::Dirty.to_i64(), id.as_str()],
                        )
                        .map_err(sql_err)?;
                    }
                    ObjectWrite::Confirm {
                        id,
                        etag,
                        updated_at,
                    } => {
                        conn.execute(
                            &format!(
                                "UPDATE {} SET etag = ?1, sync_state = ?2, updated_at = ?3 \
                                 WHERE id = ?4",
                                quoted
                            ),
                            params![etag, SyncState::Clean.to_i64(), updated_at, id.as_str()],
                        )
                        .map_err(sql_err)?;
                    }
                    ObjectWrite::MarkState { id, state } => {
                        conn.execute(
                            &format!("UPDATE {} SET sync_state = ?1 WHERE id = ?2", quoted),
                            params![state.to_i64(), id.as_str()],
                        )
                        .map_err(sql_err)?;
                    }
                    ObjectWrite::Purge { id } => {
                        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", quoted), [id.as_str()])
                            .map_err(sql_err)?;
                    }
                }
            }
            Ok(())
        })?;
        debug!("Applied {} writes to bucket {}", writes.len(), bucket);
        Ok(())
    }
}

/// Row as stored, before unsealing.
struct RawObject {
    id: String,
    payload: Vec<u8>,
    etag: Option<String>,
    sync_state: i64,
    deleted: bool,
    created_at: i64,
    updated_at: i64,
}

impl RawObject {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            etag: row.get(2)?,
            sync_state: row.get(3)?,
            deleted: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode(self, cipher: &PayloadCipher, bucket: &BucketName, table: &str) -> Result<CachedObject> {
        let plain = cipher.open(&self.payload, &object_context(table, &self.id))?;
        Ok(CachedObject {
            bucket: bucket.clone(),
            id: ObjectId::new(self.id)?,
            payload: serde_json::from_slice(&plain)?,
            etag: self.etag,
            sync_state: SyncState::from_i64(self.sync_state)?,
            deleted: self.deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn seal_payload(cipher: &PayloadCipher, table: &str, id: &ObjectId, payload: &Value) -> Result<Vec<u8>> {
    cipher.seal(&serde_json::to_vec(payload)?, &object_context(table, id.as_str()))
}

fn fetch(
    conn: &Connection,
    cipher: &PayloadCipher,
    bucket: &BucketName,
    id: &ObjectId,
) -> Result<Option<CachedObject>> {
    let table = object_table(bucket);
    conn.query_row(
        &format!("SELECT {} FROM {} WHERE id = ?1", COLUMNS, quote_ident(&table)),
        [id.as_str()],
        RawObject::from_row,
    )
    .optional()
    .map_err(sql_err)?
    .map(|raw| raw.decode(cipher, bucket, &table))
    .transpose()
}

fn live(object: Option<CachedObject>, bucket: &BucketName, id: &ObjectId) -> Result<CachedObject> {
    match object {
        Some(object) if !object.deleted => Ok(object),
        _ => Err(Error::NotFound(format!("Object '{}' in bucket {}", id, bucket))),
    }
}

fn tombstone(conn: &Connection, table: &str, id: &str) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET deleted = 1, sync_state = ?1, updated_at = ?2 WHERE id = ?3",
            quote_ident(table)
        ),
        params![SyncState::Dirty.to_i64(), now_millis(), id],
    )
    .map_err(sql_err)?;
    Ok(())
}
