//! Cache administration: enabling offline mode, buckets, logins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use tracing::{debug, info};

use offcache_common::{BucketName, Error, Result};
use offcache_crypto::PasswordVerifier;
use offcache_store::{open_shared, registry, LocalStore, LoginCache, LoginRecord, ObjectCache};
use offcache_sync::{Access, Arbiter, RemoteGateway, SyncManager};

use crate::bucket::Bucket;
use crate::config::CacheConfig;
use crate::login::{CachedSession, OnlineLogin};

type Arbiters = Mutex<HashMap<PathBuf, Weak<Arbiter>>>;

/// One arbiter per cache file, shared by every handle to that file.
fn shared_arbiter(path: &Path) -> Arc<Arbiter> {
    static ARBITERS: OnceLock<Arbiters> = OnceLock::new();
    let mut arbiters = ARBITERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    arbiters.retain(|_, arbiter| arbiter.strong_count() > 0);

    if let Some(arbiter) = arbiters.get(path).and_then(Weak::upgrade) {
        return arbiter;
    }
    let arbiter = Arbiter::new();
    arbiters.insert(path.to_path_buf(), Arc::downgrade(&arbiter));
    arbiter
}

/// Entry point of the offline cache.
///
/// The cache starts disabled. [`enable_offline`](Self::enable_offline) opens
/// (or creates) the store file; everything else requires an enabled cache.
#[derive(Debug)]
pub struct OfflineCache {
    config: CacheConfig,
    arbiter: Arc<Arbiter>,
    store: RwLock<Option<Arc<LocalStore>>>,
}

impl OfflineCache {
    /// Create a disabled cache for `config`.
    ///
    /// # Errors
    /// - `InvalidInput` if the tenant or app id cannot name a cache file
    pub fn new(config: CacheConfig) -> Result<Self> {
        let path = config.store_config().file_path()?;
        Ok(Self {
            arbiter: shared_arbiter(&path),
            config,
            store: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The arbiter gating this cache's exclusive operations and syncs.
    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn is_enabled(&self) -> bool {
        self.current().is_some()
    }

    /// Open the store, creating it on first use.
    ///
    /// Enabling an already enabled cache with the same password does
    /// nothing.
    ///
    /// # Errors
    /// - `Authentication` if `password` does not match the cache
    /// - `InvalidState` if the file belongs to another tenant or app
    pub fn enable_offline(&self, password: Option<&str>) -> Result<()> {
        let mut slot = self.store.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = slot.as_ref().filter(|store| store.is_open()) {
            return store.verify_password(password);
        }
        let store = open_shared(&self.config.store_config(), password)?;
        info!(
            "Offline mode enabled for {}/{}",
            self.config.tenant_id, self.config.app_id
        );
        *slot = Some(store);
        Ok(())
    }

    /// Close the store. Data stays on disk.
    pub fn disable_offline(&self) -> Result<()> {
        let store = self
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(store) = store {
            store.close()?;
            info!(
                "Offline mode disabled for {}/{}",
                self.config.tenant_id, self.config.app_id
            );
        }
        Ok(())
    }

    /// The open store.
    ///
    /// # Errors
    /// - `InvalidState` while offline mode is disabled
    pub fn store(&self) -> Result<Arc<LocalStore>> {
        self.current()
            .ok_or_else(|| Error::InvalidState("Offline mode is not enabled".to_string()))
    }

    /// Re-encrypt the cache under `new_password`. `None` or an empty
    /// password removes encryption.
    ///
    /// # Errors
    /// - `Locked` while a sync runs
    /// - `InvalidState` while disabled or inside an open transaction
    pub async fn change_password(&self, new_password: Option<&str>) -> Result<()> {
        let store = self.store()?;
        let _guard = self.arbiter.acquire(Access::CrudExclusive).await?;
        store.change_password(new_password)
    }

    /// Remove every cached object, login and pull mark. Sync scopes set
    /// before the clear become invalid.
    ///
    /// # Errors
    /// - `Locked` while a sync runs
    pub async fn delete_cache_all(&self) -> Result<()> {
        let store = self.store()?;
        let _guard = self.arbiter.acquire(Access::CrudExclusive).await?;
        store.reset()
    }

    /// Delete the cache file. Returns whether a file existed.
    ///
    /// # Errors
    /// - `InvalidState` while offline mode is enabled here or the file is
    ///   open elsewhere in the process
    pub fn delete_cache_file(&self) -> Result<bool> {
        if self.is_enabled() {
            return Err(Error::InvalidState(
                "Disable offline mode before deleting the cache file".to_string(),
            ));
        }
        let removed = registry::remove_file(&self.config.store_config())?;
        info!(
            "Deleted cache file for {}/{}",
            self.config.tenant_id, self.config.app_id
        );
        Ok(removed)
    }

    /// Handle to the bucket `name`, creating its table if needed.
    pub fn bucket(&self, name: &str) -> Result<Bucket> {
        let name = BucketName::new(name)?;
        let store = self.store()?;
        store.create_bucket_table(&name)?;
        Ok(Bucket::new(name, ObjectCache::new(store), self.arbiter.clone()))
    }

    /// Build a sync manager sharing this cache's store and arbiter.
    pub fn sync_manager<G: RemoteGateway + ?Sized>(&self, gateway: Arc<G>) -> Result<SyncManager<G>> {
        Ok(SyncManager::new(
            self.store()?,
            self.arbiter.clone(),
            gateway,
            self.config.sync.clone(),
        ))
    }

    /// Remember a successful online login for later offline use.
    ///
    /// Only a verifier of `password` is stored.
    pub fn cache_login(&self, login: &OnlineLogin, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidInput("Password must not be empty".to_string()));
        }
        let credential = PasswordVerifier::create(password.as_bytes(), &self.config.kdf_params)?;
        self.logins()?.store(&LoginRecord {
            username: login.username.clone(),
            email: login.email.clone(),
            session_token: login.session_token.clone(),
            expires_at: login.expires_at,
            credential,
            cached_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Restore a cached session without the server.
    ///
    /// # Errors
    /// - `InvalidState` if no unexpired login is cached for `username`
    /// - `NotPermitted` if `password` does not match
    pub fn offline_login(&self, username: &str, password: &str) -> Result<CachedSession> {
        let record = self.logins()?.get(username)?.ok_or_else(|| {
            Error::InvalidState(format!("No cached login for {}", username))
        })?;
        if !record.credential.verify(password.as_bytes())? {
            return Err(Error::NotPermitted("Invalid password".to_string()));
        }
        debug!("Offline login for {}", username);
        Ok(record.into())
    }

    /// Drop the cached login of `username`. Returns whether one existed.
    pub fn forget_login(&self, username: &str) -> Result<bool> {
        self.logins()?.remove(username)
    }

    pub fn purge_expired_logins(&self) -> Result<usize> {
        self.logins()?.purge_expired()
    }

    fn current(&self) -> Option<Arc<LocalStore>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|store| store.is_open())
            .cloned()
    }

    fn logins(&self) -> Result<LoginCache> {
        Ok(LoginCache::new(self.store()?))
    }
}
