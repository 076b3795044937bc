//! Two-tier LLM response cache: in-process LRU backed by a durable,
//! checksum-validated on-disk store, wrapped transparently around any
//! `LLMProvider`.

pub mod decorator;
pub mod disk_tier;
pub mod entry;
pub mod factory;
pub mod fingerprint;
pub mod memory_tier;
pub mod two_tier;

pub use decorator::CachingDecorator;
pub use disk_tier::{DiskStats, DiskTier};
pub use entry::CachedResponse;
pub use factory::{build_cache, wrap_provider};
pub use fingerprint::{derive, NormalizedMessage, NormalizedRequest, NormalizedTool};
pub use memory_tier::{MemoryStats, MemoryTier};
pub use two_tier::{TwoTier, TwoTierStats};
