//! In-process bounded LRU with TTL-aware eviction.
//!
//! The intrusive doubly linked list from the reference design is expressed
//! here as an arena (`Vec<Option<Slot>>`) addressed by integer index rather
//! than raw pointers (§9 design note) — `head`/`tail` and each slot's
//! `prev`/`next` are indices into the same `Vec`, so there is no unsafe
//! code and no aliasing to reason about.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use crate::cache::entry::CachedResponse;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
    pub total_size_bytes: usize,
}

impl MemoryStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot {
    key: String,
    value: CachedResponse,
    accessed_at: chrono::DateTime<Utc>,
    size_bytes: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    max_size: usize,
    total_size_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn new(max_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            max_size,
            total_size_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap();
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slots[idx].as_mut().unwrap();
        slot.prev = None;
        slot.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slots[idx].as_mut().unwrap();
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn remove_slot(&mut self, idx: usize) -> Slot {
        self.unlink(idx);
        let slot = self.slots[idx].take().unwrap();
        self.index.remove(&slot.key);
        self.free.push(idx);
        self.total_size_bytes = self.total_size_bytes.saturating_sub(slot.size_bytes);
        slot
    }

    fn insert_slot(&mut self, key: String, value: CachedResponse) -> usize {
        let size_bytes = value.size_bytes;
        let slot = Slot {
            key: key.clone(),
            value,
            accessed_at: Utc::now(),
            size_bytes,
            prev: None,
            next: None,
        };
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        };
        self.index.insert(key, idx);
        self.total_size_bytes += size_bytes;
        self.push_front(idx);
        idx
    }

    fn evict_tail(&mut self) -> Option<Slot> {
        let idx = self.tail?;
        let slot = self.remove_slot(idx);
        self.evictions += 1;
        Some(slot)
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            size: self.index.len(),
            max_size: self.max_size,
            total_size_bytes: self.total_size_bytes,
        }
    }
}

/// Bounded LRU cache keyed by request fingerprint. All operations are O(1)
/// amortized; a single `RwLock` guards the map, list, and counters as one
/// unit (§5) — `get` takes it exclusively because it mutates LRU order.
pub struct MemoryTier {
    inner: RwLock<Inner>,
}

impl MemoryTier {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::new(max_size.max(1))),
        }
    }

    /// On hit with an unexpired entry: move to head, bump `accessed_at` and
    /// `access_count`, record a hit, and return a value copy (never an
    /// alias into the locked state). On hit with an expired entry: remove
    /// it and record a miss (P4).
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.write().unwrap();
        let idx = *inner.index.get(key)?;
        let now = Utc::now();
        if inner.slots[idx].as_ref().unwrap().value.is_expired_at(now) {
            inner.remove_slot(idx);
            inner.misses += 1;
            debug!(key, "memory tier expired entry on read");
            return None;
        }
        inner.unlink(idx);
        inner.push_front(idx);
        let slot = inner.slots[idx].as_mut().unwrap();
        slot.accessed_at = now;
        slot.value.access_count += 1;
        inner.hits += 1;
        Some(slot.value.clone())
    }

    /// Insert or replace `value` under `key`, promoting it to head. Evicts
    /// from the tail while over `max_size` (I2).
    pub fn put(&self, key: &str, mut value: CachedResponse) {
        if value.size_bytes == 0 {
            value.recompute_size();
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&idx) = inner.index.get(key) {
            inner.remove_slot(idx);
        }
        inner.insert_slot(key.to_string(), value);
        while inner.index.len() > inner.max_size {
            if inner.evict_tail().is_none() {
                break;
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.index.get(key).copied() {
            Some(idx) => {
                inner.remove_slot(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        *inner = Inner::new(inner.max_size);
    }

    pub fn size(&self) -> usize {
        self.inner.read().unwrap().index.len()
    }

    pub fn stats(&self) -> MemoryStats {
        self.inner.read().unwrap().stats()
    }

    /// Scan once, remove everything expired as of `now`, and count the
    /// removals as evictions (not misses) per §4.2.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        let expired: Vec<usize> = inner
            .index
            .values()
            .copied()
            .filter(|&idx| inner.slots[idx].as_ref().unwrap().value.is_expired_at(now))
            .collect();
        let count = expired.len();
        for idx in expired {
            inner.remove_slot(idx);
            inner.evictions += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::NormalizedRequest;
    use crate::providers::LLMResponse;
    use std::time::Duration;

    fn entry(content: &str, ttl: Duration) -> CachedResponse {
        let req = NormalizedRequest::new("sys", &[], &[], 0.0);
        CachedResponse::new(content.to_string(), req, LLMResponse::text(content), ttl)
    }

    #[test]
    fn put_then_get_returns_a_hit() {
        let tier = MemoryTier::new(10);
        tier.put("k1", entry("k1", Duration::from_secs(60)));
        let got = tier.get("k1").unwrap();
        assert_eq!(got.response.content, "k1");
        assert_eq!(tier.stats().hits, 1);
    }

    #[test]
    fn miss_on_absent_key_is_recorded() {
        let tier = MemoryTier::new(10);
        assert!(tier.get("missing").is_none());
        assert_eq!(tier.stats().misses, 1);
    }

    #[test]
    fn eviction_keeps_the_n_most_recently_used() {
        let tier = MemoryTier::new(2);
        tier.put("k1", entry("k1", Duration::from_secs(60)));
        tier.put("k2", entry("k2", Duration::from_secs(60)));
        tier.put("k3", entry("k3", Duration::from_secs(60)));

        assert!(tier.get("k1").is_none());
        assert!(tier.get("k2").is_some());
        assert!(tier.get("k3").is_some());
        assert_eq!(tier.stats().evictions, 1);
    }

    #[test]
    fn get_promotes_to_head_and_saves_it_from_eviction() {
        let tier = MemoryTier::new(2);
        tier.put("k1", entry("k1", Duration::from_secs(60)));
        tier.put("k2", entry("k2", Duration::from_secs(60)));
        // Touch k1 so it becomes more recently used than k2.
        assert!(tier.get("k1").is_some());
        tier.put("k3", entry("k3", Duration::from_secs(60)));

        assert!(tier.get("k1").is_some());
        assert!(tier.get("k2").is_none());
    }

    #[test]
    fn put_on_existing_key_replaces_value_and_promotes() {
        let tier = MemoryTier::new(5);
        tier.put("k1", entry("first", Duration::from_secs(60)));
        tier.put("k1", entry("second", Duration::from_secs(60)));
        assert_eq!(tier.size(), 1);
        assert_eq!(tier.get("k1").unwrap().response.content, "second");
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_removed() {
        let tier = MemoryTier::new(5);
        // A negative-effective TTL via Duration::ZERO plus a stored
        // expires_at in the past: force it directly on the entry.
        let mut value = entry("k1", Duration::from_secs(60));
        value.expires_at = Utc::now() - chrono::Duration::seconds(1);
        tier.put("k1", value);
        assert!(tier.get("k1").is_none());
        assert_eq!(tier.size(), 0);
        assert_eq!(tier.stats().misses, 1);
    }

    #[test]
    fn cleanup_expired_counts_as_eviction_not_miss() {
        let tier = MemoryTier::new(5);
        let mut value = entry("k1", Duration::from_secs(60));
        value.expires_at = Utc::now() - chrono::Duration::seconds(1);
        tier.put("k1", value);
        let removed = tier.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(tier.stats().misses, 0);
        assert_eq!(tier.stats().evictions, 1);
    }

    #[test]
    fn clear_resets_everything() {
        let tier = MemoryTier::new(5);
        tier.put("k1", entry("k1", Duration::from_secs(60)));
        tier.get("k1");
        tier.clear();
        assert_eq!(tier.size(), 0);
        assert_eq!(tier.stats().hits, 0);
        assert_eq!(tier.stats().total_size_bytes, 0);
    }

    #[test]
    fn delete_removes_a_present_key() {
        let tier = MemoryTier::new(5);
        tier.put("k1", entry("k1", Duration::from_secs(60)));
        assert!(tier.delete("k1"));
        assert!(!tier.delete("k1"));
        assert_eq!(tier.size(), 0);
    }
}
