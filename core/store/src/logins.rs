//! Cached login sessions for offline re-authentication.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use offcache_common::{Error, Result, SecretString};
use offcache_crypto::PasswordVerifier;

use crate::db::{now_millis, sql_err, LocalStore};
use crate::schema::login_context;

/// One cached login.
#[derive(Debug, Clone)]
pub struct LoginRecord {
    pub username: String,
    pub email: Option<String>,
    /// Serialized session token as issued by the server.
    pub session_token: SecretString,
    /// Session expiry, milliseconds since the Unix epoch.
    pub expires_at: i64,
    /// Proof of the account password, never the password itself.
    pub credential: PasswordVerifier,
    pub cached_at: i64,
}

impl LoginRecord {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Typed access to the `login_cache` table.
#[derive(Debug, Clone)]
pub struct LoginCache {
    store: Arc<LocalStore>,
}

impl LoginCache {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Insert or refresh the row for `record.username`.
    pub fn store(&self, record: &LoginRecord) -> Result<()> {
        let credential = record.credential.to_bytes()?;
        self.store.write(|conn, cipher| {
            let token = cipher.seal(
                record.session_token.expose().as_bytes(),
                &login_context(&record.username, "token"),
            )?;
            let credential = cipher.seal(
                &credential,
                &login_context(&record.username, "credential"),
            )?;
            let email = record
                .email
                .as_ref()
                .map(|email| cipher.seal(email.as_bytes(), &login_context(&record.username, "email")))
                .transpose()?;
            conn.execute(
                "INSERT OR REPLACE INTO login_cache \
                 (username, email, token, expires_at, credential, cached_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.username,
                    email,
                    token,
                    record.expires_at,
                    credential,
                    record.cached_at
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })?;
        debug!("Cached login for {}", record.username);
        Ok(())
    }

    /// Fetch the row for `username`. An expired row is purged and reported
    /// as absent.
    pub fn get(&self, username: &str) -> Result<Option<LoginRecord>> {
        let record = self.store.read(|conn, cipher| {
            let row = conn
                .query_row(
                    "SELECT email, token, expires_at, credential, cached_at \
                     FROM login_cache WHERE username = ?1",
                    [username],
                    |row| {
                        Ok((
                            row.get::<_, Option<Vec<u8>>>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_err)?;

            let Some((email, token, expires_at, credential, cached_at)) = row else {
                return Ok(None);
            };
            let token = cipher.open(&token, &login_context(username, "token"))?;
            let credential = cipher.open(&credential, &login_context(username, "credential"))?;
            let email = email
                .map(|sealed| {
                    let bytes = cipher.open(&sealed, &login_context(username, "email"))?;
                    String::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
                })
                .transpose()?;
            Ok(Some(LoginRecord {
                username: username.to_string(),
                email,
                session_token: SecretString::new(
                    String::from_utf8(token)
                        .map_err(|e| Error::Serialization(e.to_string()))?,
                ),
                expires_at,
                credential: PasswordVerifier::from_bytes(&credential)?,
                cached_at,
            }))
        })?;

        match record {
            Some(record) if record.is_expired_at(now_millis()) => {
                debug!("Cached login for {} expired", username);
                self.remove(username)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Remove the row for `username`. Returns whether it existed.
    pub fn remove(&self, username: &str) -> Result<bool> {
        self.store.write(|conn, _| {
            let removed = conn
                .execute("DELETE FROM login_cache WHERE username = ?1", [username])
                .map_err(sql_err)?;
            Ok(removed > 0)
        })
    }

    /// Remove every expired row, returning how many went.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        self.store.write(|conn, _| {
            conn.execute("DELETE FROM login_cache WHERE expires_at <= ?1", [now])
                .map_err(sql_err)
        })
    }

    pub fn usernames(&self) -> Result<Vec<String>> {
        self.store.read(|conn, _| {
            let mut stmt = conn
                .prepare("SELECT username FROM login_cache ORDER BY username")
                .map_err(sql_err)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err)?;
            names.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offcache_crypto::KdfParams;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn record(username: &str, expires_at: i64) -> LoginRecord {
        LoginRecord {
            username: username.to_string(),
            email: Some(format!("{}@example.com", username)),
            session_token: SecretString::new("token-123"),
            expires_at,
            credential: PasswordVerifier::create(b"hunter2", &cheap()).unwrap(),
            cached_at: now_millis(),
        }
    }

    fn logins(password: Option<&str>) -> LoginCache {
        LoginCache::new(Arc::new(
            LocalStore::open_in_memory(password, &cheap()).unwrap(),
        ))
    }

    #[test]
    fn test_store_and_get() {
        let cache = logins(Some("pw"));
        cache.store(&record("ada", now_millis() + 60_000)).unwrap();

        let fetched = cache.get("ada").unwrap().unwrap();
        assert_eq!(fetched.session_token.expose(), "token-123");
        assert_eq!(fetched.email.as_deref(), Some("ada@example.com"));
        assert!(fetched.credential.verify(b"hunter2").unwrap());
    }

    #[test]
    fn test_refresh_replaces_row() {
        let cache = logins(None);
        cache.store(&record("ada", now_millis() + 60_000)).unwrap();
        let mut newer = record("ada", now_millis() + 120_000);
        newer.session_token = SecretString::new("token-456");
        cache.store(&newer).unwrap();

        assert_eq!(cache.usernames().unwrap(), vec!["ada"]);
        assert_eq!(cache.get("ada").unwrap().unwrap().session_token.expose(), "token-456");
    }

    #[test]
    fn test_expired_purged_on_read() {
        let cache = logins(None);
        cache.store(&record("ada", now_millis() - 1)).unwrap();
        assert!(cache.get("ada").unwrap().is_none());
        assert!(cache.usernames().unwrap().is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = logins(None);
        cache.store(&record("old", now_millis() - 1)).unwrap();
        cache.store(&record("new", now_millis() + 60_000)).unwrap();
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.usernames().unwrap(), vec!["new"]);
    }
}
