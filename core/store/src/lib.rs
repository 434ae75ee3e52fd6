//! Local store for offcache.
//!
//! One SQLite file per tenant and application holds three record families:
//! cached objects (one table per bucket), cached logins and per-bucket pull
//! bookkeeping. Sensitive columns are sealed when the cache has a password.

pub mod buckets;
pub mod cipher;
pub mod config;
pub mod db;
pub mod logins;
pub mod objects;
pub mod registry;
pub mod schema;

pub use buckets::{BucketCache, BucketRecord};
pub use cipher::PayloadCipher;
pub use config::StoreConfig;
pub use db::{LocalStore, SqlValue};
pub use logins::{LoginCache, LoginRecord};
pub use objects::{CachedObject, ObjectCache, ObjectWrite, SyncState};
pub use registry::open_shared;
