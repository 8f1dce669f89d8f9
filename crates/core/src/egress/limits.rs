//! Per-artifact-type concurrency counters.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Counts in-flight operations per limit key and refuses admissions beyond
/// the configured limit.
///
/// Admission hands back a [`RequestLimitGuard`]; the slot is released when
/// the guard drops, whatever way the operation ended.
#[derive(Clone)]
pub struct RequestLimitTracker {
    inner: Arc<LimitState>,
}

struct LimitState {
    limits: HashMap<String, u32>,
    default_limit: fn(&str) -> u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl RequestLimitTracker {
    pub fn new(limits: HashMap<String, u32>, default_limit: fn(&str) -> u32) -> Self {
        Self {
            inner: Arc::new(LimitState {
                limits,
                default_limit,
                counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn limit(&self, key: &str) -> u32 {
        self.inner
            .limits
            .get(key)
            .copied()
            .unwrap_or_else(|| (self.inner.default_limit)(key))
    }

    /// Take a slot for `key`, or `None` when the limit is already reached.
    pub fn try_acquire(&self, key: &str) -> Option<RequestLimitGuard> {
        let limit = self.limit(key);
        let mut counts = self.inner.counts.lock();
        let count = counts.entry(key.to_string()).or_insert(0);
        if *count >= limit {
            return None;
        }
        *count += 1;
        Some(RequestLimitGuard {
            tracker: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn in_flight(&self, key: &str) -> u32 {
        self.inner.counts.lock().get(key).copied().unwrap_or(0)
    }
}

#[must_use = "dropping the guard releases the slot immediately"]
pub struct RequestLimitGuard {
    tracker: RequestLimitTracker,
    key: String,
}

impl Drop for RequestLimitGuard {
    fn drop(&mut self) {
        let mut counts = self.tracker.inner.counts.lock();
        if let Some(count) = counts.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
    }
}
