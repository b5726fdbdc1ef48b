use crate::api::models::StreamDescriptor;
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct CacheEntry {
    descriptor: StreamDescriptor,
    expires_at: DateTime<Utc>,
}

/// Bounded, TTL-based memoization of resolved stream descriptors.
///
/// A hit requires `now + safety_margin < expires_at`. Expired entries are
/// swept only when a `put` pushes the entry count past `capacity`.
pub struct ResolutionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    safety_margin: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl ResolutionCache {
    pub fn new(capacity: usize, safety_margin: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            safety_margin,
            clock,
        }
    }

    pub fn get(&self, track_id: &str) -> Option<StreamDescriptor> {
        let now = self.clock.now();
        let entries = self.entries.lock();
        entries
            .get(track_id)
            .filter(|e| now + self.safety_margin < e.expires_at)
            .map(|e| e.descriptor.clone())
    }

    pub fn put(&self, track_id: &str, descriptor: StreamDescriptor) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.insert(
            track_id.to_string(),
            CacheEntry {
                expires_at: descriptor.expires_at,
                descriptor,
            },
        );

        if entries.len() > self.capacity {
            let before = entries.len();
            entries.retain(|_, e| e.expires_at > now);
            log::debug!(
                "[cache] Swept {} expired entries ({} remain)",
                before - entries.len(),
                entries.len()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
