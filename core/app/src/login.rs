//! Login data exchanged with the host application.

use offcache_common::SecretString;
use offcache_store::LoginRecord;

/// A session the host obtained from a successful online login.
#[derive(Debug, Clone)]
pub struct OnlineLogin {
    pub username: String,
    pub email: Option<String>,
    pub session_token: SecretString,
    /// Session expiry, milliseconds since the Unix epoch.
    pub expires_at: i64,
}

/// A session restored from the cache without contacting the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSession {
    pub username: String,
    pub email: Option<String>,
    pub session_token: SecretString,
    pub expires_at: i64,
}

impl From<LoginRecord> for CachedSession {
    fn from(record: LoginRecord) -> Self {
        Self {
            username: record.username,
            email: record.email,
            session_token: record.session_token,
            expires_at: record.expires_at,
        }
    }
}
