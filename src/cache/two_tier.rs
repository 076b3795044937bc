//! Composes `MemoryTier` over `DiskTier`: read-through, write-through,
//! promotion on disk hit, and the single TTL contract shared by both tiers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::cache::disk_tier::{DiskStats, DiskTier};
use crate::cache::entry::CachedResponse;
use crate::cache::memory_tier::{MemoryStats, MemoryTier};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TwoTierStats {
    pub memory: MemoryStats,
    pub disk: DiskStats,
}

pub struct TwoTier {
    memory: MemoryTier,
    disk: Arc<DiskTier>,
    ttl: Duration,
}

impl TwoTier {
    pub fn new(max_size: usize, disk: Arc<DiskTier>, ttl: Duration) -> Self {
        Self {
            memory: MemoryTier::new(max_size),
            disk,
            ttl,
        }
    }

    /// Memory hit returns immediately. A disk hit is promoted into memory
    /// (inserted at head, so it can never be the entry an eviction just
    /// made room for) before being returned.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }
        if let Some(value) = self.disk.get(key) {
            debug!(key, "promoting disk hit into memory tier");
            self.memory.put(key, value.clone());
            return Some(value);
        }
        None
    }

    /// `value`'s `expires_at` is recomputed here from the tier's configured
    /// TTL, regardless of what the caller set — the TTL contract lives at
    /// this layer, not in whatever constructed the entry.
    pub fn put(&self, key: &str, mut value: CachedResponse) {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(7));
        value.expires_at = Utc::now() + ttl;
        self.memory.put(key, value.clone());
        self.disk.put(key, value);
    }

    pub fn delete(&self, key: &str) {
        self.memory.delete(key);
        self.disk.delete(key);
    }

    pub fn cleanup_expired(&self) -> Result<(usize, usize)> {
        let memory_removed = self.memory.cleanup_expired();
        let disk_removed = self.disk.cleanup_expired()?;
        Ok((memory_removed, disk_removed))
    }

    pub fn stats(&self) -> TwoTierStats {
        TwoTierStats {
            memory: self.memory.stats(),
            disk: self.disk.stats(),
        }
    }

    pub fn disk_tier(&self) -> &Arc<DiskTier> {
        &self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::NormalizedRequest;
    use crate::providers::LLMResponse;
    use tempfile::TempDir;

    fn value(content: &str) -> CachedResponse {
        let req = NormalizedRequest::new("sys", &[], &[], 0.0);
        CachedResponse::new(
            content.to_string(),
            req,
            LLMResponse::text(content),
            Duration::from_secs(60),
        )
    }

    fn two_tier(max_size: usize, ttl: Duration, dir: &TempDir) -> TwoTier {
        let disk = Arc::new(DiskTier::new(dir.path().join("cache.json"), None));
        disk.load().unwrap();
        TwoTier::new(max_size, disk, ttl)
    }

    #[test]
    fn disk_hit_is_promoted_to_memory() {
        let dir = TempDir::new().unwrap();
        let tt = two_tier(10, Duration::from_secs(60), &dir);
        // Seed the disk tier directly, bypassing memory.
        tt.disk_tier().put("k1", value("hello"));

        let got = tt.get("k1").expect("disk hit");
        assert_eq!(got.response.content, "hello");
        assert_eq!(tt.stats().memory.size, 1);
    }

    #[test]
    fn put_writes_through_both_tiers() {
        let dir = TempDir::new().unwrap();
        let tt = two_tier(10, Duration::from_secs(60), &dir);
        tt.put("k1", value("hello"));

        assert_eq!(tt.stats().memory.size, 1);
        // Disk tier put does not flush synchronously but is visible in-memory.
        assert!(tt.disk_tier().get("k1").is_some());
    }

    #[test]
    fn ttl_expiry_is_enforced_regardless_of_which_tier_is_hit() {
        let dir = TempDir::new().unwrap();
        let tt = two_tier(10, Duration::from_millis(1), &dir);
        tt.put("k1", value("hello"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(tt.get("k1").is_none());
    }

    #[test]
    fn delete_removes_from_both_tiers() {
        let dir = TempDir::new().unwrap();
        let tt = two_tier(10, Duration::from_secs(60), &dir);
        tt.put("k1", value("hello"));
        tt.delete("k1");
        assert!(tt.get("k1").is_none());
        assert!(tt.disk_tier().get("k1").is_none());
    }
}
