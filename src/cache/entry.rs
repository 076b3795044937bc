//! `CachedResponse`: the value stored in either tier, plus its self-checksum.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::fingerprint::NormalizedRequest;
use crate::providers::LLMResponse;

const FALLBACK_SIZE_BYTES: usize = 1024;

/// One cached completion, keyed by its fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub key: String,
    pub request: NormalizedRequest,
    pub response: LLMResponse,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub access_count: u64,
    pub checksum: String,
}

impl CachedResponse {
    pub fn new(
        key: String,
        request: NormalizedRequest,
        response: LLMResponse,
        ttl: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        let checksum = compute_checksum(&key, &request, &response);
        let size_bytes = estimate_size(&key, &request, &response);
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(7));
        Self {
            key,
            request,
            response,
            created_at: now,
            expires_at: now + ttl,
            size_bytes,
            access_count: 0,
            checksum,
        }
    }

    /// I4/P4: an entry is never returned once expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// I5/P7: an empty checksum is treated as valid for forward
    /// compatibility with entries written before checksums existed.
    pub fn checksum_is_valid(&self) -> bool {
        self.checksum.is_empty() || self.checksum == compute_checksum(&self.key, &self.request, &self.response)
    }

    /// Recompute `size_bytes` defensively, e.g. when a caller hands the tier
    /// a value with stale or absent metadata.
    pub fn recompute_size(&mut self) {
        self.size_bytes = estimate_size(&self.key, &self.request, &self.response);
    }

    /// Recompute and set `checksum`. `DiskTier::put` calls this defensively
    /// on every write even though `new` already sets a correct checksum.
    pub fn refresh_checksum(&mut self) {
        self.checksum = compute_checksum(&self.key, &self.request, &self.response);
    }
}

/// Checksum payload shape: `{key, request, response}` only, never the
/// mutable metadata (`created_at`, `expires_at`, `size_bytes`,
/// `access_count`) — otherwise every access/eviction would invalidate it.
#[derive(Serialize)]
struct ChecksumPayload<'a> {
    key: &'a str,
    request: &'a NormalizedRequest,
    response: &'a LLMResponse,
}

fn compute_checksum(key: &str, request: &NormalizedRequest, response: &LLMResponse) -> String {
    let payload = ChecksumPayload {
        key,
        request,
        response,
    };
    // Checksumming an already-validated in-memory structure cannot fail in
    // practice; an empty string here degrades to "always valid" (§1.1).
    let bytes = match serde_json::to_vec(&payload) {
        Ok(b) => b,
        Err(_) => return String::new(),
    };
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// §7 SerializationFailure policy: fall back to a conservative constant
/// rather than fail the put.
fn estimate_size(key: &str, request: &NormalizedRequest, response: &LLMResponse) -> usize {
    let payload = ChecksumPayload {
        key,
        request,
        response,
    };
    serde_json::to_vec(&payload)
        .map(|bytes| bytes.len())
        .unwrap_or(FALLBACK_SIZE_BYTES)
}
