//! In-memory storage-tier implementations.
//!
//! Back tests and single-node deployments. The fast tier keeps a bounded
//! map with FIFO eviction; the content store is an unbounded map standing
//! in for a bucket.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use prerender_core::Error;
use tokio::sync::RwLock;

use super::{ContentStore, FastTier};

struct FastState {
    map: HashMap<String, Bytes>,
    order: VecDeque<String>,
}

/// Bounded in-memory fast tier with FIFO eviction at capacity.
#[derive(Clone)]
pub struct MemoryFastTier {
    inner: Arc<RwLock<FastState>>,
    capacity: usize,
}

impl MemoryFastTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FastState { map: HashMap::new(), order: VecDeque::new() })),
            capacity: capacity.max(1),
        }
    }

    /// Current number of entries, for tests and logging.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }
}

#[async_trait::async_trait]
impl FastTier for MemoryFastTier {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        Ok(self.inner.read().await.map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
        let mut state = self.inner.write().await;
        if !state.map.contains_key(key) {
            state.order.push_back(key.to_string());
        }
        state.map.insert(key.to_string(), value);
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.map.remove(&oldest);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, Error> {
        let mut state = self.inner.write().await;
        if state.map.remove(key).is_some() {
            state.order.retain(|k| k != key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.inner.read().await.map.contains_key(key))
    }
}

/// In-memory stand-in for the durable object store.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    inner: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryContentStore {
    async fn upload(&self, key: &str, value: Bytes) -> Result<(), Error> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Option<Bytes>, Error> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}
