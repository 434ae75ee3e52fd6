//! Cache configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use offcache_common::{Error, Result};
use offcache_crypto::KdfParams;
use offcache_store::config::default_data_dir;
use offcache_store::StoreConfig;
use offcache_sync::SyncConfig;

/// Everything an [`OfflineCache`](crate::OfflineCache) needs to open its
/// store and drive sync passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the cache file.
    pub data_dir: PathBuf,
    pub tenant_id: String,
    pub app_id: String,
    /// Key derivation cost, for the cache password and cached login
    /// credentials alike.
    pub kdf_params: KdfParams,
    pub busy_timeout_ms: u64,
    pub sync: SyncConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            data_dir: default_data_dir(),
            tenant_id: store.tenant_id,
            app_id: store.app_id,
            kdf_params: store.kdf,
            busy_timeout_ms: store.busy_timeout_ms,
            sync: SyncConfig::default(),
        }
    }
}

impl CacheConfig {
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

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("Invalid cache configuration: {}", e)))
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The part of the configuration the local store consumes.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.data_dir.clone(),
            tenant_id: self.tenant_id.clone(),
            app_id: self.app_id.clone(),
            kdf: self.kdf_params.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offcache_sync::ConflictStrategy;

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CacheConfig::from_json(
            r#"{"data_dir": "/tmp/cache", "tenant_id": "acme", "sync": {"conflict_strategy": "prefer_client"}}"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.app_id, "default");
        assert_eq!(config.sync.conflict_strategy, ConflictStrategy::PreferClient);
        assert_eq!(config.sync.push_batch_size, 50);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = CacheConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let config = CacheConfig::new("/data", "acme", "notes");
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        assert_eq!(CacheConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_store_config() {
        let config = CacheConfig::new("/data", "acme", "notes");
        let store = config.store_config();
        assert_eq!(
            store.file_path().unwrap(),
            PathBuf::from("/data/acme_notes.sqlite")
        );
    }
}
