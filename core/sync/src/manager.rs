//! Sync manager: pull, reconcile and push one bucket against a gateway.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use offcache_common::{BucketName, Error, ObjectId, Result};
use offcache_query::{Clause, Filter};
use offcache_store::{
    BucketCache, CachedObject, LocalStore, ObjectCache, ObjectWrite, SyncState,
};

use crate::arbiter::{Access, Arbiter};
use crate::conflict::{ConflictResolver, ConflictStrategy, Resolution};
use crate::gateway::{PushDocument, PushOutcome, RemoteGateway, RemoteObject};
use crate::scope::SyncScope;

/// Configuration for the sync manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Strategy used unless a custom resolver is installed.
    pub conflict_strategy: ConflictStrategy,
    /// Documents per push request.
    pub push_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::default(),
            push_batch_size: 50,
        }
    }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub bucket: BucketName,
    /// Documents received from the server.
    pub pulled: usize,
    /// Local changes the server acknowledged.
    pub pushed: usize,
    /// Rows removed locally (server deletions, confirmed local deletions).
    pub purged: usize,
    /// Conflicts handed to the resolver.
    pub conflicts: usize,
    /// Server time recorded as the new pull mark.
    pub server_time: i64,
    pub duration: Duration,
}

impl SyncReport {
    fn new(bucket: BucketName) -> Self {
        Self {
            bucket,
            pulled: 0,
            pushed: 0,
            purged: 0,
            conflicts: 0,
            server_time: 0,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveScope {
    scope: SyncScope,
    /// Store epoch when the scope was set; a reset since invalidates it.
    epoch: u64,
}

/// Bidirectional synchronization of one scoped bucket.
pub struct SyncManager<G: RemoteGateway + ?Sized> {
    gateway: Arc<G>,
    store: Arc<LocalStore>,
    objects: ObjectCache,
    buckets: BucketCache,
    arbiter: Arc<Arbiter>,
    resolver: Arc<dyn ConflictResolver>,
    config: SyncConfig,
    scope: Mutex<Option<ActiveScope>>,
}

impl<G: RemoteGateway + ?Sized> SyncManager<G> {
    /// Create a manager sharing `store` and `arbiter` with the rest of the
    /// cache.
    pub fn new(
        store: Arc<LocalStore>,
        arbiter: Arc<Arbiter>,
        gateway: Arc<G>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gateway,
            objects: ObjectCache::new(store.clone()),
            buckets: BucketCache::new(store.clone()),
            store,
            arbiter,
            resolver: config.conflict_strategy.resolver(),
            config,
            scope: Mutex::new(None),
        }
    }

    /// Replace the configured strategy with a custom resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Set what the next passes synchronize. Creates the bucket table.
    pub fn set_scope(&self, scope: SyncScope) -> Result<()> {
        self.store.create_bucket_table(&scope.bucket)?;
        let epoch = self.store.epoch();
        debug!("Sync scope set to bucket {} (epoch {})", scope.bucket, epoch);
        *self.lock_scope() = Some(ActiveScope { scope, epoch });
        Ok(())
    }

    pub fn clear_scope(&self) {
        *self.lock_scope() = None;
    }

    pub fn scope(&self) -> Option<SyncScope> {
        self.lock_scope().as_ref().map(|active| active.scope.clone())
    }

    /// Run one full sync pass over the current scope.
    ///
    /// # Preconditions
    /// - A scope is set and the cache was not cleared since
    ///
    /// # Postconditions
    /// - The pull mark advances only after a fully successful pass
    /// - On failure every row is either untouched, reconciled, or back to
    ///   `Dirty`
    ///
    /// # Errors
    /// - `Locked` if another sync is running or pending
    /// - `InvalidState` without a valid scope
    /// - `Remote` and `Store` errors are returned as-is
    pub async fn sync(&self) -> Result<SyncReport> {
        let _guard = self.arbiter.acquire(Access::Sync).await?;
        let scope = self.current_scope()?;
        let bucket = scope.bucket.clone();
        let start = Instant::now();
        info!("Starting sync of bucket {}", bucket);

        let mut report = SyncReport::new(bucket.clone());
        let fingerprint = scope.fingerprint();
        let since = self.buckets.last_pull(&bucket, &fingerprint)?;
        let batch = self
            .gateway
            .pull(&bucket, since, scope.filter.as_ref())
            .await?;
        report.pulled = batch.objects.len();

        self.reconcile(&bucket, batch.objects, &mut report)?;
        self.push_pending(&bucket, scope.filter.as_ref(), &mut report)
            .await?;
        self.buckets
            .record_pull(&bucket, &fingerprint, batch.server_time)?;

        report.server_time = batch.server_time;
        report.duration = start.elapsed();
        info!(
            "Sync of bucket {} completed in {:?}: {} pulled, {} pushed, {} purged, {} conflicts",
            bucket, report.duration, report.pulled, report.pushed, report.purged, report.conflicts
        );
        Ok(report)
    }

    fn lock_scope(&self) -> MutexGuard<'_, Option<ActiveScope>> {
        self.scope.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_scope(&self) -> Result<SyncScope> {
        let active = self
            .lock_scope()
            .clone()
            .ok_or_else(|| Error::InvalidState("No sync scope set".to_string()))?;
        if active.epoch != self.store.epoch() || !self.store.has_bucket_table(&active.scope.bucket)? {
            return Err(Error::InvalidState(format!(
                "Sync scope for bucket {} was purged by a cache clear",
                active.scope.bucket
            )));
        }
        Ok(active.scope)
    }

    /// Fold pulled documents into the local rows as one batch.
    fn reconcile(
        &self,
        bucket: &BucketName,
        remote_objects: Vec<RemoteObject>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut local: HashMap<ObjectId, CachedObject> = self
            .objects
            .scan(bucket)?
            .into_iter()
            .map(|o| (o.id.clone(), o))
            .collect();

        let mut writes = Vec::new();
        for remote in remote_objects {
            match local.remove(&remote.id) {
                None => {
                    if !remote.deleted {
                        writes.push(adopt(remote));
                    }
                }
                Some(row) if row.sync_state == SyncState::Clean => {
                    if remote.deleted {
                        report.purged += 1;
                        writes.push(ObjectWrite::Purge { id: remote.id });
                    } else if row.etag.as_deref() != Some(remote.etag.as_str()) {
                        writes.push(adopt(remote));
                    }
                }
                Some(row) => {
                    if row.etag.as_deref() == Some(remote.etag.as_str()) {
                        // Local change based on the current server copy.
                        continue;
                    }
                    report.conflicts += 1;
                    writes.push(self.settle(&row, remote, report));
                }
            }
        }

        debug!("Reconciling {} pulled changes into bucket {}", writes.len(), bucket);
        self.objects.apply(bucket, &writes)
    }

    /// Push the pending rows inside the scope in batches.
    ///
    /// Tombstones of documents the server never acknowledged are purged
    /// locally instead of being pushed.
    async fn push_pending(
        &self,
        bucket: &BucketName,
        filter: Option<&Clause>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let filter = filter.map(Filter::compile);
        let (unsent, pending): (Vec<CachedObject>, Vec<CachedObject>) = self
            .objects
            .pending(bucket)?
            .into_iter()
            .filter(|o| filter.as_ref().map_or(true, |f| f.matches(&o.payload)))
            .partition(|o| o.deleted && o.etag.is_none());

        if !unsent.is_empty() {
            debug!(
                "Dropping {} never-pushed tombstones from bucket {}",
                unsent.len(),
                bucket
            );
            report.purged += unsent.len();
            let purges: Vec<ObjectWrite> = unsent
                .into_iter()
                .map(|o| ObjectWrite::Purge { id: o.id })
                .collect();
            self.objects.apply(bucket, &purges)?;
        }
        if pending.is_empty() {
            return Ok(());
        }

        for chunk in pending.chunks(self.config.push_batch_size.max(1)) {
            self.objects.apply(bucket, &mark_all(chunk, SyncState::Sync))?;

            let documents = chunk
                .iter()
                .map(|o| PushDocument {
                    id: o.id.clone(),
                    payload: o.payload.clone(),
                    base_etag: o.etag.clone(),
                    deleted: o.deleted,
                })
                .collect();

            let outcomes = match self.gateway.push(bucket, documents).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!("Push to bucket {} failed: {}", bucket, e);
                    if let Err(revert) = self.objects.apply(bucket, &mark_all(chunk, SyncState::Dirty)) {
                        error!("Failed to revert in-flight rows of {}: {}", bucket, revert);
                    }
                    return Err(e);
                }
            };

            let rows: HashMap<&ObjectId, &CachedObject> = chunk.iter().map(|o| (&o.id, o)).collect();
            let mut answered = HashSet::new();
            let mut writes = Vec::new();
            for outcome in outcomes {
                let Some(row) = rows.get(outcome.id()).copied() else {
                    warn!("Gateway answered for unknown document {}", outcome.id());
                    continue;
                };
                answered.insert(row.id.clone());
                match outcome {
                    PushOutcome::Acked {
                        id,
                        etag,
                        updated_at,
                    } => {
                        report.pushed += 1;
                        if row.deleted {
                            report.purged += 1;
                            writes.push(ObjectWrite::Purge { id });
                        } else {
                            writes.push(ObjectWrite::Confirm {
                                id,
                                etag,
                                updated_at,
                            });
                        }
                    }
                    PushOutcome::Conflict { remote, .. } => {
                        report.conflicts += 1;
                        writes.push(self.settle(row, remote, report));
                    }
                }
            }

            for row in chunk.iter().filter(|o| !answered.contains(&o.id)) {
                writes.push(ObjectWrite::MarkState {
                    id: row.id.clone(),
                    state: SyncState::Dirty,
                });
            }
            self.objects.apply(bucket, &writes)?;
        }
        Ok(())
    }

    /// Resolve one conflict into the write that applies the decision.
    fn settle(&self, local: &CachedObject, remote: RemoteObject, report: &mut SyncReport) -> ObjectWrite {
        let resolution = self.resolver.resolve(local, &remote);
        debug!("Conflict on {}: {:?}", local.id, resolution);
        match resolution {
            Resolution::KeepRemote if remote.deleted => {
                report.purged += 1;
                ObjectWrite::Purge { id: remote.id }
            }
            Resolution::KeepRemote => adopt(remote),
            Resolution::KeepLocal => ObjectWrite::Rebase {
                id: remote.id,
                etag: remote.etag,
            },
        }
    }
}

fn adopt(remote: RemoteObject) -> ObjectWrite {
    ObjectWrite::Adopt {
        id: remote.id,
        payload: remote.payload,
        etag: remote.etag,
        updated_at: remote.updated_at,
    }
}

fn mark_all(rows: &[CachedObject], state: SyncState) -> Vec<ObjectWrite> {
    rows.iter()
        .map(|o| ObjectWrite::MarkState {
            id: o.id.clone(),
            state,
        })
        .collect()
}
