//! offcache sync
//!
//! This module provides synchronization for cached buckets, including:
//! - The concurrency arbiter every sync and exclusive CRUD operation passes
//! - The remote gateway contract and an in-memory implementation
//! - Pluggable conflict resolution
//! - The sync manager driving pull, reconcile and push

pub mod arbiter;
pub mod conflict;
pub mod gateway;
pub mod manager;
pub mod memory;
pub mod scope;

// Re-export main types
pub use arbiter::{Access, Arbiter, ArbiterGuard, ArbiterState};
pub use conflict::{
    ConflictResolver, ConflictStrategy, LastWriteWins, PreferClient, PreferServer, Resolution,
};
pub use gateway::{PullBatch, PushDocument, PushOutcome, RemoteGateway, RemoteObject};
pub use manager::{SyncConfig, SyncManager, SyncReport};
pub use memory::MemoryGateway;
pub use scope::SyncScope;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = SyncConfig::default();
        assert_eq!(config.conflict_strategy, ConflictStrategy::PreferServer);
        assert_eq!(Arbiter::new().state(), ArbiterState::Idle);
    }
}
