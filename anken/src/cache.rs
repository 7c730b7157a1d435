//! Query cache and clock
//!
//! A TTL cache for list queries, keyed by string. The clock is injected so
//! expiry and reload throttling can be driven deterministically in tests.

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(36_500));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether `since + interval` has been reached at `now`
pub(crate) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    match chrono::Duration::from_std(interval) {
        Ok(interval) => now - since >= interval,
        Err(_) => false,
    }
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

/// TTL cache for query results
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    clock: Arc<dyn Clock>,
}

impl QueryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Return the cached value for `key`, or run `loader` and cache its result.
    ///
    /// Failed loads are not cached. Two concurrent misses may both load;
    /// the later result wins.
    pub async fn get<T, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.lookup::<T>(key) {
            tracing::debug!("Cache hit: {}", key);
            return Ok(value);
        }

        tracing::debug!("Cache miss: {}", key);
        let value = loader().await?;

        let entry = CacheEntry {
            value: Arc::new(value.clone()),
            stored_at: self.clock.now(),
            ttl,
        };
        self.lock().insert(key.to_string(), entry);

        Ok(value)
    }

    fn lookup<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut entries = self.lock();

        let fresh = entries
            .get(key)
            .map(|entry| !elapsed(entry.stored_at, now, entry.ttl))?;

        if !fresh {
            entries.remove(key);
            return None;
        }

        entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<T>())
            .cloned()
    }

    /// Drop one key
    pub fn invalidate(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            tracing::debug!("Cache invalidated: {}", key);
        }
    }

    /// Drop every key starting with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.lock().retain(|key, _| !key.starts_with(prefix));
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        self.lock().clear();
        tracing::debug!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
