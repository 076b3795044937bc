//! Durable, checksum-validated, atomically-saved cache store.
//!
//! `get`/`put`/`delete` only touch the in-memory copy and the dirty flag —
//! per §5, the only operations that perform filesystem I/O are `load`,
//! `save`, `clear`, and `cleanup_expired`. Durability otherwise comes from
//! the background flusher started by `start_auto_save`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::entry::CachedResponse;
use crate::error::{Result, ZeptoError};

const CURRENT_VERSION: u32 = 1;
/// §4.3: bring the serialized footprint under this fraction of
/// `max_disk_bytes` when the limit is exceeded after a save.
const DISK_SIZE_TARGET_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskFile {
    version: u32,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    entries: HashMap<String, CachedResponse>,
    stats: DiskStats,
}

impl DiskFile {
    fn empty() -> Self {
        let now = Utc::now();
        Self {
            version: CURRENT_VERSION,
            created_at: now,
            updated_at: now,
            entries: HashMap::new(),
            stats: DiskStats::default(),
        }
    }
}

struct DiskState {
    file: DiskFile,
    dirty: bool,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl DiskState {
    fn recompute_stats(&mut self) {
        let now = Utc::now();
        let expired_entries = self
            .file
            .entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .count();
        let total_size_bytes = self.file.entries.values().map(|e| e.size_bytes).sum();
        let total = self.hits + self.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        };
        self.file.stats = DiskStats {
            total_entries: self.file.entries.len(),
            expired_entries,
            total_size_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate,
        };
    }
}

struct FlusherHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct DiskTier {
    path: PathBuf,
    max_disk_bytes: Option<u64>,
    state: RwLock<DiskState>,
    flusher: Mutex<Option<FlusherHandle>>,
}

impl DiskTier {
    pub fn new(path: PathBuf, max_disk_bytes: Option<u64>) -> Self {
        Self {
            path,
            max_disk_bytes,
            state: RwLock::new(DiskState {
                file: DiskFile::empty(),
                dirty: false,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            flusher: Mutex::new(None),
        }
    }

    /// Load the persisted file, recovering from corruption or a version
    /// mismatch by discarding and reinitializing. Never returns an error to
    /// the caller for corruption/version problems (§7) — only a hard
    /// filesystem failure while reading an existing file is propagated.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            let mut state = self.state.write().unwrap();
            state.file = DiskFile::empty();
            state.dirty = false;
            return Ok(());
        }

        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| ZeptoError::Cache(format!("read {}: {e}", self.path.display())))?;

        let parsed: std::result::Result<DiskFile, _> = serde_json::from_str(&raw);
        let mut file = match parsed {
            Ok(file) => file,
            Err(e) => {
                self.quarantine_corrupted_file();
                warn!(path = %self.path.display(), error = %e, "cache file failed to parse; quarantined and reinitialized");
                let mut state = self.state.write().unwrap();
                state.file = DiskFile::empty();
                state.dirty = false;
                return Ok(());
            }
        };

        if file.version != CURRENT_VERSION {
            warn!(found = file.version, expected = CURRENT_VERSION, "cache version mismatch; discarding");
            file = DiskFile::empty();
        } else {
            let before = file.entries.len();
            file.entries.retain(|_, entry| entry.checksum_is_valid());
            let dropped = before - file.entries.len();
            if dropped > 0 {
                warn!(dropped, "dropped cache entries with invalid checksum");
            }
        }

        let mut state = self.state.write().unwrap();
        state.file = file;
        state.dirty = false;
        Ok(())
    }

    fn quarantine_corrupted_file(&self) {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let backup = self.path.with_extension(format!("corrupted.{stamp}"));
        if let Err(e) = std::fs::rename(&self.path, &backup) {
            warn!(error = %e, "failed to quarantine corrupted cache file");
        }
    }

    /// Atomic save: write to `<path>.tmp`, then rename over the target.
    pub fn save(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().unwrap();
            state.file.updated_at = Utc::now();
            if let Some(max) = self.max_disk_bytes {
                let removed = enforce_disk_size_limit(&mut state.file, max);
                if removed > 0 {
                    state.evictions += removed as u64;
                }
            }
            state.recompute_stats();
            state.file.clone()
        };

        write_atomic(&self.path, &snapshot)?;

        let mut state = self.state.write().unwrap();
        state.dirty = false;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Utc::now();
        {
            let mut state = self.state.write().unwrap();
            match state.file.entries.get(key) {
                Some(entry) if !entry.is_expired_at(now) => {
                    state.hits += 1;
                    return Some(entry.clone());
                }
                Some(_) => {
                    state.file.entries.remove(key);
                    state.dirty = true;
                    state.misses += 1;
                    debug!(key, "disk tier expired entry on read");
                    return None;
                }
                None => {
                    state.misses += 1;
                }
            }
        }
        None
    }

    pub fn put(&self, key: &str, mut value: CachedResponse) {
        value.refresh_checksum();
        let mut state = self.state.write().unwrap();
        state.file.entries.insert(key.to_string(), value);
        state.dirty = true;
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let removed = state.file.entries.remove(key).is_some();
        if removed {
            state.dirty = true;
        }
        removed
    }

    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            let created_at = state.file.created_at;
            state.file = DiskFile {
                created_at,
                ..DiskFile::empty()
            };
            state.hits = 0;
            state.misses = 0;
            state.evictions = 0;
            state.dirty = true;
        }
        self.save()
    }

    pub fn cleanup_expired(&self) -> Result<usize> {
        let removed = {
            let mut state = self.state.write().unwrap();
            let now = Utc::now();
            let expired_keys: Vec<String> = state
                .file
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired_keys {
                state.file.entries.remove(key);
            }
            if !expired_keys.is_empty() {
                state.dirty = true;
                state.evictions += expired_keys.len() as u64;
            }
            expired_keys.len()
        };
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> DiskStats {
        let mut state = self.state.write().unwrap();
        state.recompute_stats();
        state.file.stats.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().unwrap().dirty
    }

    fn flush_if_dirty(&self) {
        if !self.is_dirty() {
            return;
        }
        if let Err(e) = self.save() {
            warn!(error = %e, "cache background flush failed; will retry next tick");
        }
    }

    /// Spawn the background flusher. Idempotent: a second call while one is
    /// already running is a no-op.
    ///
    /// `save`/`load` are blocking `std::fs` calls (shared with this tier's
    /// synchronous public API, used as-is outside async contexts by
    /// `cache::factory`), so each tick runs them via `spawn_blocking` rather
    /// than calling them directly on the tokio worker thread.
    pub fn start_auto_save(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.flusher.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tier = Arc::clone(self);
        let join = tokio::spawn(async move {
            info!("cache disk flusher started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tier = Arc::clone(&tier);
                        let _ = tokio::task::spawn_blocking(move || tier.flush_if_dirty()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            let tier = Arc::clone(&tier);
                            let _ = tokio::task::spawn_blocking(move || tier.flush_if_dirty()).await;
                            info!("cache disk flusher stopped");
                            return;
                        }
                    }
                }
            }
        });
        *guard = Some(FlusherHandle { shutdown_tx, join });
    }

    /// Stop the flusher, performing one final flush if dirty. Idempotent:
    /// the second call finds no handle and does nothing.
    pub async fn stop(&self) {
        let handle = { self.flusher.lock().unwrap().take() };
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(true);
            let _ = handle.join.await;
        }
    }
}

fn enforce_disk_size_limit(file: &mut DiskFile, max_bytes: u64) -> usize {
    let total: u64 = file.entries.values().map(|e| e.size_bytes as u64).sum();
    if total <= max_bytes {
        return 0;
    }
    let target = (max_bytes as f64 * DISK_SIZE_TARGET_FRACTION) as u64;
    let mut by_age: Vec<(String, chrono::DateTime<Utc>)> = file
        .entries
        .iter()
        .map(|(k, e)| (k.clone(), e.created_at))
        .collect();
    by_age.sort_by_key(|(_, created_at)| *created_at);

    let mut running = total;
    let mut removed = 0;
    for (key, _) in by_age {
        if running <= target {
            break;
        }
        if let Some(entry) = file.entries.remove(&key) {
            running = running.saturating_sub(entry.size_bytes as u64);
            removed += 1;
        }
    }
    removed
}

fn write_atomic(path: &Path, file: &DiskFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ZeptoError::Cache(format!("create dir {}: {e}", parent.display())))?;
        set_dir_mode(parent, 0o755);
    }
    let tmp_path = path.with_extension("tmp");
    let serialized = serde_json::to_string_pretty(file)
        .map_err(|e| ZeptoError::Cache(format!("serialize cache file: {e}")))?;
    std::fs::write(&tmp_path, &serialized)
        .map_err(|e| ZeptoError::Cache(format!("write {}: {e}", tmp_path.display())))?;
    set_file_mode(&tmp_path, 0o644);
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(ZeptoError::Cache(format!("rename {} -> {}: {e}", tmp_path.display(), path.display())));
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) {}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) {}
