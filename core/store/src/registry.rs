//! Process-wide registry of open stores, keyed by file path.
//!
//! Opening the same cache file twice hands back the live handle instead of a
//! second connection, provided the same credentials are presented.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tracing::debug;

use offcache_common::{Error, Result};

use crate::config::StoreConfig;
use crate::db::LocalStore;

type Registry = Mutex<HashMap<PathBuf, Weak<LocalStore>>>;

fn registry() -> &'static Registry {
    static OPEN_STORES: OnceLock<Registry> = OnceLock::new();
    OPEN_STORES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open the store for `config`, reusing a live handle to the same file.
///
/// # Errors
/// - `Authentication` if the password does not match the live handle or the
///   file
pub fn open_shared(config: &StoreConfig, password: Option<&str>) -> Result<Arc<LocalStore>> {
    let path = config.file_path()?;
    let mut stores = registry().lock().unwrap_or_else(PoisonError::into_inner);
    stores.retain(|_, handle| handle.strong_count() > 0);

    if let Some(store) = stores.get(&path).and_then(Weak::upgrade) {
        if store.is_open() {
            store.verify_password(password)?;
            debug!("Reusing open store {:?}", path);
            return Ok(store);
        }
    }

    let store = Arc::new(LocalStore::open(config, password)?);
    stores.insert(path, Arc::downgrade(&store));
    Ok(store)
}

/// Whether a live, open handle exists for `path`.
pub fn is_open(path: &Path) -> bool {
    let stores = registry().lock().unwrap_or_else(PoisonError::into_inner);
    stores
        .get(path)
        .and_then(Weak::upgrade)
        .is_some_and(|store| store.is_open())
}

/// Delete the cache file of `config` together with its journal files.
///
/// # Errors
/// - `InvalidState` while a handle to the file is open
pub fn remove_file(config: &StoreConfig) -> Result<bool> {
    let path = config.file_path()?;
    if is_open(&path) {
        return Err(Error::InvalidState(format!(
            "Cache file {:?} is still open",
            path
        )));
    }
    let existed = path.exists();
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let mut file = path.clone().into_os_string();
        file.push(suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    debug!("Removed cache file {:?}", path);
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offcache_crypto::KdfParams;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            kdf: KdfParams {
                memory_cost: 1024,
                time_cost: 1,
                parallelism: 1,
            },
            ..StoreConfig::new(dir.path(), "acme", "notes")
        }
    }

    #[test]
    fn test_same_file_shares_handle() {
        let dir = TempDir::new().unwrap();
        let a = open_shared(&config(&dir), Some("pw")).unwrap();
        let b = open_shared(&config(&dir), Some("pw")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_wrong_password_on_live_handle() {
        let dir = TempDir::new().unwrap();
        let _a = open_shared(&config(&dir), Some("pw")).unwrap();
        let err = open_shared(&config(&dir), Some("nope")).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_closed_handle_reopens() {
        let dir = TempDir::new().unwrap();
        let a = open_shared(&config(&dir), None).unwrap();
        a.close().unwrap();
        let b = open_shared(&config(&dir), None).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(b.is_open());
    }

    #[test]
    fn test_remove_file_requires_closed() {
        let dir = TempDir::new().unwrap();
        let store = open_shared(&config(&dir), None).unwrap();
        assert!(remove_file(&config(&dir)).is_err());

        store.close().unwrap();
        assert!(remove_file(&config(&dir)).unwrap());
        assert!(!dir.path().join("acme_notes.sqlite").exists());
        assert!(!remove_file(&config(&dir)).unwrap());
    }
}
