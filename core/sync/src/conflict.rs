//! Conflict resolution between a locally changed document and the server copy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use offcache_store::CachedObject;

use crate::gateway::RemoteObject;

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local content; it is pushed over the server copy.
    KeepLocal,
    /// Discard the local change and adopt the server copy.
    KeepRemote,
}

/// Decides conflicts during sync.
///
/// Called when a document changed locally while its server copy moved on
/// (or was deleted) since the ETag the local change was based on.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, local: &CachedObject, remote: &RemoteObject) -> Resolution;
}

/// Local changes always win.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferClient;

impl ConflictResolver for PreferClient {
    fn resolve(&self, _local: &CachedObject, _remote: &RemoteObject) -> Resolution {
        Resolution::KeepLocal
    }
}

/// The server copy always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferServer;

impl ConflictResolver for PreferServer {
    fn resolve(&self, _local: &CachedObject, _remote: &RemoteObject) -> Resolution {
        Resolution::KeepRemote
    }
}

/// The more recent change wins; the server on a tie.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, local: &CachedObject, remote: &RemoteObject) -> Resolution {
        if local.updated_at > remote.updated_at {
            Resolution::KeepLocal
        } else {
            Resolution::KeepRemote
        }
    }
}

/// Built-in strategy selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    PreferClient,
    #[default]
    PreferServer,
    LastWriteWins,
}

impl ConflictStrategy {
    pub fn resolver(self) -> Arc<dyn ConflictResolver> {
        match self {
            ConflictStrategy::PreferClient => Arc::new(PreferClient),
            ConflictStrategy::PreferServer => Arc::new(PreferServer),
            ConflictStrategy::LastWriteWins => Arc::new(LastWriteWins),
        }
    }
}
