//! offcache application layer
//!
//! The API hosts program against: an [`OfflineCache`] per tenant and
//! application, [`Bucket`] handles for document CRUD and queries, cached
//! logins for offline re-authentication, and sync managers sharing the
//! cache's store and arbiter.

pub mod bucket;
pub mod cache;
pub mod config;
pub mod login;

pub use bucket::Bucket;
pub use cache::OfflineCache;
pub use config::CacheConfig;
pub use login::{CachedSession, OnlineLogin};

pub use offcache_common::{BucketName, Error, ObjectId, Result, SecretString};
pub use offcache_query::{Clause, Query, SortKey};
pub use offcache_store::{CachedObject, SyncState};
pub use offcache_sync::{
    ConflictResolver, ConflictStrategy, MemoryGateway, RemoteGateway, SyncConfig, SyncManager,
    SyncReport, SyncScope,
};
