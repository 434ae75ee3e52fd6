//! Local store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use offcache_common::{Error, Result};
use offcache_crypto::KdfParams;

/// Where the cache file lives and how it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the cache file.
    pub data_dir: PathBuf,
    pub tenant_id: String,
    pub app_id: String,
    /// Key derivation cost for password-protected caches.
    pub kdf: KdfParams,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tenant_id: "default".to_string(),
            app_id: "default".to_string(),
            kdf: KdfParams::default(),
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            tenant_id: tenant_id.into(),
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Path of the cache file: `<data_dir>/<tenant_id>_<app_id>.sqlite`.
    ///
    /// # Errors
    /// - Tenant or app id empty, or containing characters unsafe in a file name
    pub fn file_path(&self) -> Result<PathBuf> {
        validate_identity_part("tenant id", &self.tenant_id)?;
        validate_identity_part("app id", &self.app_id)?;
        Ok(self
            .data_dir
            .join(format!("{}_{}.sqlite", self.tenant_id, self.app_id)))
    }
}

/// Platform application-private data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("offcache")
}

fn validate_identity_part(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '@'))
        && !value.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid {}: '{}'", what, value)))
    }
}
