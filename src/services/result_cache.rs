//! Result cache
//!
//! Shared across requests, keyed by the executor's canonical cache key.
//! Eviction is lazy: an expired entry is removed by the read that finds it.
//! A per-key single-flight latch keeps concurrent identical requests from
//! issuing duplicate database fetches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::PayloadFragment;
use crate::services::executor::ExecError;

struct CacheSlot {
    value: PayloadFragment,
    inserted_at: Instant,
}

pub struct ResultCache {
    entries: DashMap<String, CacheSlot>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// Read a fresh entry; expired entries are evicted and reported as a
    /// miss.
    pub fn get(&self, key: &str) -> Option<PayloadFragment> {
        let expired = match self.entries.get(key) {
            Some(slot) if slot.inserted_at.elapsed() <= self.ttl => {
                return Some(slot.value.clone());
            },
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Last-writer-wins insert.
    pub fn insert(&self, key: &str, value: PayloadFragment) {
        self.entries
            .insert(key.to_string(), CacheSlot { value, inserted_at: Instant::now() });
    }

    /// Manual invalidation hook: drop every parameter variant of one query.
    pub fn invalidate(&self, query_id: &str) {
        let prefix = format!("{}?", query_id);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache-through fetch with single-flight: while one caller fetches a
    /// key, others queue on the latch and read the freshly inserted value
    /// instead of hitting the database again. Errors are not cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<(PayloadFragment, bool), ExecError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PayloadFragment, ExecError>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok((hit, true));
        }

        let latch = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = latch.lock().await;

        // A concurrent holder of the latch may have populated the key while
        // we waited for it.
        if let Some(hit) = self.get(key) {
            return Ok((hit, true));
        }

        let result = fetch().await;
        if let Ok(value) = &result {
            self.insert(key, value.clone());
        }
        self.inflight.remove(key);
        result.map(|v| (v, false))
    }
}
