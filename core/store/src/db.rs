//! The local store: one SQLite connection per cache file.
//!
//! All access goes through a single connection guarded by a mutex. DAO writes
//! run inside [`LocalStore::write`], which opens a transaction, or a savepoint
//! when the caller already started one with [`LocalStore::begin`], so a failed
//! write never leaves a partial row behind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use offcache_common::{BucketName, Error, Result};
use offcache_crypto::{KdfParams, Salt};

use crate::cipher::PayloadCipher;
use crate::config::StoreConfig;
use crate::schema::{
    self, bucket_of_table, meta, object_context, object_table, object_table_ddl, quote_ident,
    CACHE_DDL, META_DDL,
};

/// Map an SQLite failure into the store error variant.
pub(crate) fn sql_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn closed() -> Error {
    Error::InvalidState("Local store is closed".to_string())
}

/// Current wall-clock time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Inner {
    conn: Option<Connection>,
    cipher: PayloadCipher,
}

/// Embedded, optionally encrypted store for one tenant and application.
pub struct LocalStore {
    path: Option<PathBuf>,
    kdf: KdfParams,
    inner: Mutex<Inner>,
    epoch: AtomicU64,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl LocalStore {
    /// Open or create the cache file described by `config`.
    ///
    /// # Preconditions
    /// - An existing encrypted file must be opened with its password
    ///
    /// # Postconditions
    /// - A new file records the tenant and app ids and, if a password was
    ///   given, the key material needed to check it later
    ///
    /// # Errors
    /// - `Authentication` for a missing, wrong or unexpected password
    /// - `InvalidState` if the file belongs to another tenant or app
    /// - `Store` for SQLite failures
    pub fn open(config: &StoreConfig, password: Option<&str>) -> Result<Self> {
        let path = config.file_path()?;
        std::fs::create_dir_all(&config.data_dir)?;
        let existed = path.exists();

        let mut conn = Connection::open(&path).map_err(sql_err)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(sql_err)?;
        ensure_auto_vacuum(&conn, existed)?;

        let cipher = initialize(
            &mut conn,
            &config.tenant_id,
            &config.app_id,
            password,
            &config.kdf,
        )?;
        info!(
            "Opened local store at {:?} (encrypted: {})",
            path,
            cipher.is_encrypted()
        );

        Ok(Self {
            path: Some(path),
            kdf: config.kdf.clone(),
            inner: Mutex::new(Inner {
                conn: Some(conn),
                cipher,
            }),
            epoch: AtomicU64::new(0),
        })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory(password: Option<&str>, kdf: &KdfParams) -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(sql_err)?;
        let cipher = initialize(&mut conn, "memory", "memory", password, kdf)?;
        Ok(Self {
            path: None,
            kdf: kdf.clone(),
            inner: Mutex::new(Inner {
                conn: Some(conn),
                cipher,
            }),
            epoch: AtomicU64::new(0),
        })
    }

    /// File backing this store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.lock().conn.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.lock().cipher.is_encrypted()
    }

    /// Counter advanced by every [`reset`](Self::reset).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Release the connection. Every later call fails with `InvalidState`.
    pub fn close(&self) -> Result<()> {
        let conn = self.lock().conn.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| sql_err(e))?;
            info!("Closed local store {:?}", self.path);
        }
        Ok(())
    }

    /// Check `password` against the key material in the file.
    pub fn verify_password(&self, password: Option<&str>) -> Result<()> {
        self.read(|conn, _| unlock(conn, password).map(|_| ()))
    }

    // ---- raw access ----

    /// Execute one statement, returning the number of changed rows.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(sql, params_from_iter(params.iter()))
                .map_err(sql_err)
        })
    }

    /// Insert one row into `table`, returning its rowid.
    pub fn insert(&self, table: &str, values: &[(&str, SqlValue)]) -> Result<i64> {
        if values.is_empty() {
            return Err(Error::InvalidInput("Insert needs at least one column".into()));
        }
        let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.write(|conn, _| {
            conn.execute(&sql, params_from_iter(values.iter().map(|(_, v)| v)))
                .map_err(sql_err)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Delete rows of `table` matching `filter` (an SQL expression), or all
    /// rows when `filter` is `None`.
    pub fn delete(&self, table: &str, filter: Option<&str>, params: &[SqlValue]) -> Result<usize> {
        let sql = match filter {
            Some(filter) => format!("DELETE FROM {} WHERE {}", quote_ident(table), filter),
            None => format!("DELETE FROM {}", quote_ident(table)),
        };
        self.write(|conn, _| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(sql_err)
        })
    }

    /// Every row of `table`, restricted to `columns` (all when empty).
    pub fn query_raw(&self, table: &str, columns: &[&str]) -> Result<Vec<Vec<SqlValue>>> {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let sql = format!("SELECT {} FROM {}", projection, quote_ident(table));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let width = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get::<_, SqlValue>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })
                .map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
    }

    // ---- explicit transactions ----

    /// Start an explicit transaction. DAO writes issued before the matching
    /// [`commit`](Self::commit) or [`rollback`](Self::rollback) join it.
    pub fn begin(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("BEGIN IMMEDIATE").map_err(sql_err))
    }

    pub fn commit(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("COMMIT").map_err(sql_err))
    }

    pub fn rollback(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("ROLLBACK").map_err(sql_err))
    }

    pub fn in_transaction(&self) -> Result<bool> {
        self.with_conn(|conn| Ok(!conn.is_autocommit()))
    }

    // ---- tables ----

    /// Names of all user tables.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .map_err(sql_err)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err)?;
            names.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
    }

    /// Buckets that currently have an object table.
    pub fn bucket_tables(&self) -> Result<Vec<BucketName>> {
        self.with_conn(|conn| {
            Ok(object_tables(conn)?
                .iter()
                .filter_map(|t| bucket_of_table(t))
                .collect())
        })
    }

    pub fn create_bucket_table(&self, bucket: &BucketName) -> Result<()> {
        let ddl = object_table_ddl(bucket);
        self.write(|conn, _| conn.execute_batch(&ddl).map_err(sql_err))?;
        debug!("Ensured object table for bucket {}", bucket);
        Ok(())
    }

    /// Drop the object table of `bucket`. Returns whether it existed.
    pub fn drop_bucket_table(&self, bucket: &BucketName) -> Result<bool> {
        let table = object_table(bucket);
        self.write(|conn, _| {
            let existed = table_exists(conn, &table)?;
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(&table)))
                .map_err(sql_err)?;
            Ok(existed)
        })
    }

    pub fn has_bucket_table(&self, bucket: &BucketName) -> Result<bool> {
        let table = object_table(bucket);
        self.with_conn(|conn| table_exists(conn, &table))
    }

    /// Drop every object table and empty the login and bucket caches in one
    /// transaction, then advance the epoch.
    pub fn reset(&self) -> Result<()> {
        self.write(|conn, _| {
            for table in object_tables(conn)? {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(&table)))
                    .map_err(sql_err)?;
            }
            conn.execute_batch(
                "DROP TABLE IF EXISTS login_cache; DROP TABLE IF EXISTS bucket_cache;",
            )
            .map_err(sql_err)?;
            conn.execute_batch(CACHE_DDL).map_err(sql_err)
        })?;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Local store reset (epoch {})", epoch);
        Ok(())
    }

    // ---- encryption ----

    /// Re-seal every sealed column under `new_password`. `None` or an empty
    /// password removes encryption.
    ///
    /// # Errors
    /// - `InvalidState` while an explicit transaction is open
    /// - Any failure rolls back and leaves the old password in effect
    pub fn change_password(&self, new_password: Option<&str>) -> Result<()> {
        let new_password = new_password.filter(|p| !p.is_empty());
        let mut inner = self.lock();
        let Inner { conn, cipher } = &mut *inner;
        let conn = conn.as_mut().ok_or_else(closed)?;
        if !conn.is_autocommit() {
            return Err(Error::InvalidState(
                "Cannot change the password inside an open transaction".to_string(),
            ));
        }

        let (next, salt) = match new_password {
            Some(password) => {
                let salt = Salt::generate();
                (
                    PayloadCipher::from_password(password, &salt, &self.kdf)?,
                    Some(salt),
                )
            }
            None => (PayloadCipher::plaintext(), None),
        };

        let tx = conn.transaction().map_err(sql_err)?;
        let mut resealed = 0;
        for table in object_tables(&tx)? {
            resealed += reseal_objects(&tx, &table, cipher, &next)?;
        }
        resealed += reseal_logins(&tx, cipher, &next)?;
        clear_key_material(&tx)?;
        if let Some(salt) = &salt {
            write_key_material(&tx, salt, &self.kdf, &next)?;
        }
        tx.commit().map_err(sql_err)?;

        *cipher = next;
        info!(
            "Changed cache password ({} rows re-sealed, encrypted: {})",
            resealed,
            cipher.is_encrypted()
        );
        Ok(())
    }

    // ---- DAO plumbing ----

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut inner = self.lock();
        let conn = inner.conn.as_mut().ok_or_else(closed)?;
        f(conn)
    }

    /// Run a read against the connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection, &PayloadCipher) -> Result<T>) -> Result<T> {
        let inner = self.lock();
        let conn = inner.conn.as_ref().ok_or_else(closed)?;
        f(conn, &inner.cipher)
    }

    /// Run `f` atomically: in a new transaction, or in a savepoint of the
    /// explicit transaction already open.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection, &PayloadCipher) -> Result<T>) -> Result<T> {
        let mut inner = self.lock();
        let Inner { conn, cipher } = &mut *inner;
        let conn = conn.as_mut().ok_or_else(closed)?;
        if conn.is_autocommit() {
            let tx = conn.transaction().map_err(sql_err)?;
            let out = f(&tx, cipher)?;
            tx.commit().map_err(sql_err)?;
            Ok(out)
        } else {
            let sp = conn.savepoint().map_err(sql_err)?;
            let out = f(&sp, cipher)?;
            sp.commit().map_err(sql_err)?;
            Ok(out)
        }
    }
}

fn ensure_auto_vacuum(conn: &Connection, existed: bool) -> Result<()> {
    let mode: i64 = conn
        .query_row("PRAGMA auto_vacuum", [], |row| row.get(0))
        .map_err(sql_err)?;
    if mode == 1 {
        return Ok(());
    }
    conn.execute_batch("PRAGMA auto_vacuum = FULL;")
        .map_err(sql_err)?;
    if existed {
        info!("Converting cache file to auto_vacuum = FULL");
        conn.execute_batch("VACUUM;").map_err(sql_err)?;
    }
    Ok(())
}

/// Create the fixed tables, then either stamp a new file or unlock an
/// existing one.
fn initialize(
    conn: &mut Connection,
    tenant_id: &str,
    app_id: &str,
    password: Option<&str>,
    kdf: &KdfParams,
) -> Result<PayloadCipher> {
    let password = password.filter(|p| !p.is_empty());
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(sql_err)?;
    conn.execute_batch(META_DDL).map_err(sql_err)?;
    conn.execute_batch(CACHE_DDL).map_err(sql_err)?;

    match read_meta_string(conn, meta::TENANT_ID)? {
        None => {
            let tx = conn.transaction().map_err(sql_err)?;
            write_meta(&tx, meta::FORMAT_VERSION, schema::FORMAT_VERSION.as_bytes())?;
            write_meta(&tx, meta::TENANT_ID, tenant_id.as_bytes())?;
            write_meta(&tx, meta::APP_ID, app_id.as_bytes())?;
            let cipher = match password {
                Some(password) => {
                    let salt = Salt::generate();
                    let cipher = PayloadCipher::from_password(password, &salt, kdf)?;
                    write_key_material(&tx, &salt, kdf, &cipher)?;
                    cipher
                }
                None => PayloadCipher::plaintext(),
            };
            tx.commit().map_err(sql_err)?;
            debug!("Initialized new cache for {}/{}", tenant_id, app_id);
            Ok(cipher)
        }
        Some(stored_tenant) => {
            let stored_app = read_meta_string(conn, meta::APP_ID)?.unwrap_or_default();
            if stored_tenant != tenant_id || stored_app != app_id {
                return Err(Error::InvalidState(format!(
                    "Cache file belongs to {}/{}, not {}/{}",
                    stored_tenant, stored_app, tenant_id, app_id
                )));
            }
            unlock(conn, password)
        }
    }
}

/// Build the cipher for an existing file, checking the password.
fn unlock(conn: &Connection, password: Option<&str>) -> Result<PayloadCipher> {
    let password = password.filter(|p| !p.is_empty());
    let salt = read_meta(conn, meta::KDF_SALT)?;
    match (salt, password) {
        (None, None) => Ok(PayloadCipher::plaintext()),
        (None, Some(_)) => Err(Error::Authentication(
            "Cache is not password protected".to_string(),
        )),
        (Some(_), None) => Err(Error::Authentication(
            "Cache is password protected; a password is required".to_string(),
        )),
        (Some(salt), Some(password)) => {
            let salt = Salt::from_slice(&salt)?;
            let params: KdfParams = serde_json::from_slice(
                &read_meta(conn, meta::KDF_PARAMS)?
                    .ok_or_else(|| Error::Store("Missing KDF parameters".to_string()))?,
            )?;
            let check = read_meta(conn, meta::KEY_CHECK)?
                .ok_or_else(|| Error::Store("Missing key check".to_string()))?;
            let cipher = PayloadCipher::from_password(password, &salt, &params)?;
            if cipher.verify_key_check(&check) {
                Ok(cipher)
            } else {
                Err(Error::Authentication("Wrong cache password".to_string()))
            }
        }
    }
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT value FROM cache_meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
    .map_err(sql_err)
}

fn read_meta_string(conn: &Connection, key: &str) -> Result<Option<String>> {
    read_meta(conn, key)?
        .map(|bytes| {
            String::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
        })
        .transpose()
}

fn write_meta(conn: &Connection, key: &str, value: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(sql_err)?;
    Ok(())
}

fn write_key_material(
    conn: &Connection,
    salt: &Salt,
    kdf: &KdfParams,
    cipher: &PayloadCipher,
) -> Result<()> {
    write_meta(conn, meta::KDF_SALT, salt.as_bytes())?;
    write_meta(conn, meta::KDF_PARAMS, &serde_json::to_vec(kdf)?)?;
    write_meta(conn, meta::KEY_CHECK, &cipher.key_check()?)
}

fn clear_key_material(conn: &Connection) -> Result<()> {
    conn.execute(
        "DELETE FROM cache_meta WHERE key IN (?1, ?2, ?3)",
        params![meta::KDF_SALT, meta::KDF_PARAMS, meta::KEY_CHECK],
    )
    .map_err(sql_err)?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .map_err(sql_err)?;
    Ok(count > 0)
}

fn object_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            r"SELECT name FROM sqlite_master
              WHERE type = 'table' AND name LIKE 'obj\_%' ESCAPE '\'
              ORDER BY name",
        )
        .map_err(sql_err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sql_err)?;
    names.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
}

fn reseal_objects(
    conn: &Connection,
    table: &str,
    old: &PayloadCipher,
    new: &PayloadCipher,
) -> Result<usize> {
    let quoted = quote_ident(table);
    let rows: Vec<(String, Vec<u8>)> = {
        let mut stmt = conn
            .prepare(&format!("SELECT id, payload FROM {}", quoted))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)?
    };

    let update = format!("UPDATE {} SET payload = ?1 WHERE id = ?2", quoted);
    for (id, payload) in &rows {
        let context = object_context(table, id);
        let plain = old.open(payload, &context)?;
        conn.execute(&update, params![new.seal(&plain, &context)?, id])
            .map_err(sql_err)?;
    }
    Ok(rows.len())
}

fn reseal_logins(conn: &Connection, old: &PayloadCipher, new: &PayloadCipher) -> Result<usize> {
    type SealedLogin = (String, Option<Vec<u8>>, Vec<u8>, Vec<u8>);
    let rows: Vec<SealedLogin> = {
        let mut stmt = conn
            .prepare("SELECT username, email, token, credential FROM login_cache")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)?
    };

    for (username, email, token, credential) in &rows {
        let email_ctx = schema::login_context(username, "email");
        let token_ctx = schema::login_context(username, "token");
        let credential_ctx = schema::login_context(username, "credential");
        let email = email
            .as_ref()
            .map(|sealed| new.seal(&old.open(sealed, &email_ctx)?, &email_ctx))
            .transpose()?;
        let token = new.seal(&old.open(token, &token_ctx)?, &token_ctx)?;
        let credential = new.seal(&old.open(credential, &credential_ctx)?, &credential_ctx)?;
        conn.execute(
            "UPDATE login_cache SET email = ?1, token = ?2, credential = ?3 WHERE username = ?4",
            params![email, token, credential, username],
        )
        .map_err(sql_err)?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            kdf: cheap(),
            ..StoreConfig::new(dir.path(), "acme", "notes")
        }
    }

    #[test]
    fn test_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(&config(&dir), None).unwrap();
        assert!(dir.path().join("acme_notes.sqlite").exists());
        assert!(!store.is_encrypted());

        let tables = store.table_names().unwrap();
        assert_eq!(tables, vec!["bucket_cache", "cache_meta", "login_cache"]);
    }

    #[test]
    fn test_auto_vacuum_full() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(&config(&dir), None).unwrap();
        let mode = store
            .with_conn(|conn| {
                conn.query_row("PRAGMA auto_vacuum", [], |row| row.get::<_, i64>(0))
                    .map_err(sql_err)
            })
            .unwrap();
        assert_eq!(mode, 1);
    }

    #[test]
    fn test_password_checks_on_reopen() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(&config(&dir), Some("secret")).unwrap();
        assert!(store.is_encrypted());
        store.close().unwrap();

        let err = LocalStore::open(&config(&dir), Some("wrong")).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        let err = LocalStore::open(&config(&dir), None).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(LocalStore::open(&config(&dir), Some("secret")).is_ok());
    }

    #[test]
    fn test_password_on_plaintext_file_rejected() {
        let dir = TempDir::new().unwrap();
        LocalStore::open(&config(&dir), None).unwrap().close().unwrap();
        let err = LocalStore::open(&config(&dir), Some("secret")).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(LocalStore::open(&config(&dir), Some("")).is_ok());
    }

    #[test]
    fn test_identity_mismatch() {
        let dir = TempDir::new().unwrap();
        LocalStore::open(&config(&dir), None).unwrap().close().unwrap();

        let other = StoreConfig::new(dir.path(), "other", "notes");
        std::fs::rename(
            dir.path().join("acme_notes.sqlite"),
            dir.path().join("other_notes.sqlite"),
        )
        .unwrap();
        let err = LocalStore::open(&other, None).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_raw_operations() {
        let store = LocalStore::open_in_memory(None, &cheap()).unwrap();
        store
            .execute("CREATE TABLE t (k TEXT, v INTEGER)", &[])
            .unwrap();
        store
            .insert(
                "t",
                &[("k", SqlValue::Text("a".into())), ("v", SqlValue::Integer(1))],
            )
            .unwrap();
        store
            .insert(
                "t",
                &[("k", SqlValue::Text("b".into())), ("v", SqlValue::Integer(2))],
            )
            .unwrap();

        let rows = store.query_raw("t", &["k"]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![SqlValue::Text("a".into())]);

        let removed = store
            .delete("t", Some("v > ?1"), &[SqlValue::Integer(1)])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.query_raw("t", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_transaction_rollback() {
        let store = LocalStore::open_in_memory(None, &cheap()).unwrap();
        store.execute("CREATE TABLE t (k TEXT)", &[]).unwrap();

        store.begin().unwrap();
        assert!(store.in_transaction().unwrap());
        store
            .insert("t", &[("k", SqlValue::Text("a".into()))])
            .unwrap();
        store.rollback().unwrap();

        assert!(!store.in_transaction().unwrap());
        assert!(store.query_raw("t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_bucket_tables() {
        let store = LocalStore::open_in_memory(None, &cheap()).unwrap();
        let bucket = BucketName::new("notes").unwrap();
        assert!(!store.has_bucket_table(&bucket).unwrap());

        store.create_bucket_table(&bucket).unwrap();
        store.create_bucket_table(&bucket).unwrap();
        assert!(store.has_bucket_table(&bucket).unwrap());
        assert_eq!(store.bucket_tables().unwrap(), vec![bucket.clone()]);

        assert!(store.drop_bucket_table(&bucket).unwrap());
        assert!(!store.drop_bucket_table(&bucket).unwrap());
    }

    #[test]
    fn test_reset_advances_epoch() {
        let store = LocalStore::open_in_memory(None, &cheap()).unwrap();
        store
            .create_bucket_table(&BucketName::new("notes").unwrap())
            .unwrap();
        assert_eq!(store.epoch(), 0);

        store.reset().unwrap();
        assert_eq!(store.epoch(), 1);
        assert!(store.bucket_tables().unwrap().is_empty());
        assert!(store.table_names().unwrap().contains(&"login_cache".to_string()));
    }

    #[test]
    fn test_change_password_refused_in_transaction() {
        let store = LocalStore::open_in_memory(None, &cheap()).unwrap();
        store.begin().unwrap();
        let err = store.change_password(Some("pw")).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        store.rollback().unwrap();
        store.change_password(Some("pw")).unwrap();
        assert!(store.is_encrypted());
    }

    #[test]
    fn test_closed_store() {
        let store = LocalStore::open_in_memory(None, &cheap()).unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        let err = store.table_names().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
