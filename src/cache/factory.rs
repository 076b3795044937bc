//! Builds the caching decorator only when caching is enabled by config —
//! mirrors `memory::factory::create_searcher`'s pattern of returning a
//! trait object regardless of which concrete path was taken.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cache::disk_tier::DiskTier;
use crate::cache::two_tier::TwoTier;
use crate::cache::CachingDecorator;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::providers::LLMProvider;

/// Build the two-tier cache described by `config`. Returns `Ok(None)` when
/// caching is disabled so callers can skip constructing a decorator
/// entirely, matching `enabled: false` short-circuiting in §6.
pub fn build_cache(config: &CacheConfig) -> Result<Option<Arc<TwoTier>>> {
    if !config.enabled {
        return Ok(None);
    }
    config.validate()?;

    let path = config.resolved_path();
    let disk = Arc::new(DiskTier::new(path.clone(), config.max_disk_bytes));
    disk.load()?;

    if let Some(secs) = config.auto_save_interval_secs {
        disk.start_auto_save(Duration::from_secs(secs));
        info!(path = %path.display(), interval_secs = secs, "cache auto-save enabled");
    }

    let ttl = Duration::from_secs(config.ttl_secs);
    Ok(Some(Arc::new(TwoTier::new(config.max_size, disk, ttl))))
}

/// Wrap `provider` in a `CachingDecorator` when `config.enabled`, otherwise
/// return it unwrapped. Either way the caller sees `Arc<dyn LLMProvider>`.
pub fn wrap_provider<P>(config: &CacheConfig, provider: Arc<P>) -> Result<Arc<dyn LLMProvider>>
where
    P: LLMProvider + 'static,
{
    match build_cache(config)? {
        Some(cache) => {
            let ttl = Duration::from_secs(config.ttl_secs);
            Ok(Arc::new(CachingDecorator::new(provider, cache, ttl)))
        }
        None => {
            warn!("response cache disabled; provider calls are never cached");
            Ok(provider)
        }
    }
}
