//! Storage-tier collaborator interfaces.
//!
//! The engine consumes two externally hosted stores: a low-latency fast
//! tier for fully rendered HTML and a durable object store behind it. Both
//! are abstracted as traits; network-backed clients live outside this core,
//! the in-memory implementations here back tests and single-node use.
//!
//! Each implementation must be safe for concurrent reuse behind a shared
//! handle; no locks are held across tiers.

pub mod memory;

use bytes::Bytes;
use prerender_core::Error;

pub use memory::{MemoryContentStore, MemoryFastTier};

/// Low-latency cache for rendered HTML.
///
/// No TTL is set through this interface; the tier manages its own
/// eviction (LRU/capacity).
#[async_trait::async_trait]
pub trait FastTier: Send + Sync {
    /// Fetch a value. Absence is a value, not an error.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error>;

    /// Store a value with no expiry.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error>;

    /// Delete a key, returning how many entries were removed.
    async fn delete(&self, key: &str) -> Result<u64, Error>;

    /// Existence check without transferring the value.
    async fn exists(&self, key: &str) -> Result<bool, Error>;
}

/// Durable object store for rendered HTML.
///
/// "Not found" is distinguishable from a hard failure: `download` returns
/// `Ok(None)` for a missing key, `Err(StorageUnavailable)` when the store
/// itself is unreachable. `delete` of a missing key is a no-op.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    async fn upload(&self, key: &str, value: Bytes) -> Result<(), Error>;

    async fn download(&self, key: &str) -> Result<Option<Bytes>, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;
}
