//! Per-stage file cache for incremental rebuilds.
//!
//! Watch mode rebuilds the whole pipeline on every change, but most files
//! have not changed. Transforming stages (templates, sass, minifiers) look up
//! each input here before invoking their collaborator, and lint stages skip
//! files that passed before with identical content.
//!
//! ## Cache keys
//!
//! Entries are keyed by `(stage, relative path)` and hold two hashes:
//!
//! - **`source_hash`**: SHA-256 of the input bytes. Content-based rather than
//!   mtime-based, since the temporary tree is recreated on every build.
//! - **`params_hash`**: SHA-256 of whatever else shapes the output (stage
//!   options, template context). Changing an option re-runs the stage for
//!   every file.
//!
//! A hit requires both hashes to match.
//!
//! ## Ownership
//!
//! The cache lives in memory only and may be shared between orchestrators.
//! Each build [`claims`](StageCache::claim) it with its orchestrator id and
//! resolved stage list; if either differs from the previous claim, every
//! entry is dropped first.

use crate::stages::StageId;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A single cached result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_hash: String,
    pub params_hash: String,
    /// Produced bytes. `None` for stages whose only result is a pass.
    pub output: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct CacheState {
    owner: Option<(u64, Vec<StageId>)>,
    entries: HashMap<(StageId, String), CacheEntry>,
}

#[derive(Debug, Default)]
pub struct StageCache {
    state: Mutex<CacheState>,
}

impl StageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Entries are plain data; a panic elsewhere cannot leave them torn.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the cache for a build. Returns `true` if existing entries were
    /// kept, `false` if they were discarded because the owner or the stage
    /// list changed.
    pub fn claim(&self, instance: u64, stages: &[StageId]) -> bool {
        let mut state = self.lock();
        let kept = state
            .owner
            .as_ref()
            .is_some_and(|(id, s)| *id == instance && s == stages);
        if !kept {
            state.entries.clear();
            state.owner = Some((instance, stages.to_vec()));
        }
        kept
    }

    /// Drop every entry and the current claim.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.owner = None;
    }

    /// Look up an entry whose hashes both match.
    pub fn lookup(
        &self,
        stage: StageId,
        key: &str,
        source_hash: &str,
        params_hash: &str,
    ) -> Option<CacheEntry> {
        self.lock()
            .entries
            .get(&(stage, key.to_string()))
            .filter(|e| e.source_hash == source_hash && e.params_hash == params_hash)
            .cloned()
    }

    pub fn store(
        &self,
        stage: StageId,
        key: &str,
        source_hash: String,
        params_hash: String,
        output: Option<Vec<u8>>,
    ) {
        self.lock().entries.insert(
            (stage, key.to_string()),
            CacheEntry {
                source_hash,
                params_hash,
                output,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-256 of a byte slice, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

/// SHA-256 of a serializable parameter set.
///
/// `serde_json` maps keep their keys sorted, so equal parameters always hash
/// equally.
pub fn hash_params(params: &impl serde::Serialize) -> String {
    let encoded = serde_json::to_vec(params).unwrap_or_default();
    hash_bytes(&encoded)
}

/// Summary of cache performance for a build run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} processed ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} processed", self.misses)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // =========================================================================
    // StageCache
    // =========================================================================

    #[test]
    fn lookup_hit() {
        let cache = StageCache::new();
        cache.store(StageId::Sass, "a.scss", "src".into(), "prm".into(), Some(b"css".to_vec()));

        let entry = cache.lookup(StageId::Sass, "a.scss", "src", "prm").unwrap();
        assert_eq!(entry.output.as_deref(), Some(&b"css"[..]));
    }

    #[test]
    fn lookup_miss_on_changed_hashes() {
        let cache = StageCache::new();
        cache.store(StageId::Sass, "a.scss", "src".into(), "prm".into(), None);

        assert!(cache.lookup(StageId::Sass, "a.scss", "other", "prm").is_none());
        assert!(cache.lookup(StageId::Sass, "a.scss", "src", "other").is_none());
    }

    #[test]
    fn entries_are_per_stage() {
        let cache = StageCache::new();
        cache.store(StageId::MinifyJs, "app.js", "s".into(), "p".into(), None);
        assert!(cache.lookup(StageId::LintJs, "app.js", "s", "p").is_none());
    }

    #[test]
    fn claim_by_same_owner_keeps_entries() {
        let cache = StageCache::new();
        let stages = [StageId::Setup, StageId::Sass, StageId::Clean];
        assert!(!cache.claim(1, &stages));
        cache.store(StageId::Sass, "a.scss", "s".into(), "p".into(), None);

        assert!(cache.claim(1, &stages));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn claim_by_other_instance_invalidates() {
        let cache = StageCache::new();
        let stages = [StageId::Setup, StageId::Clean];
        cache.claim(1, &stages);
        cache.store(StageId::Setup, "x", "s".into(), "p".into(), None);

        assert!(!cache.claim(2, &stages));
        assert!(cache.is_empty());
    }

    #[test]
    fn claim_with_new_stage_list_invalidates() {
        let cache = StageCache::new();
        cache.claim(1, &[StageId::Setup, StageId::Clean]);
        cache.store(StageId::Setup, "x", "s".into(), "p".into(), None);

        assert!(!cache.claim(1, &[StageId::Setup, StageId::Sass, StageId::Clean]));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_drops_entries_and_claim() {
        let cache = StageCache::new();
        let stages = [StageId::Setup];
        cache.claim(1, &stages);
        cache.store(StageId::Setup, "x", "s".into(), "p".into(), None);

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(!cache.claim(1, &stages));
    }

    // =========================================================================
    // Hashing
    // =========================================================================

    #[test]
    fn hash_file_deterministic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.txt");
        fs::write(&path, "hello world").unwrap();

        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, hash_bytes(b"hello world"));
    }

    #[test]
    fn hash_file_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.txt");

        fs::write(&path, "version 1").unwrap();
        let h1 = hash_file(&path).unwrap();

        fs::write(&path, "version 2").unwrap();
        let h2 = hash_file(&path).unwrap();

        assert_ne!(h1, h2);
    }

    #[test]
    fn hash_params_ignores_key_order() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(hash_params(&a), hash_params(&b));
        assert_ne!(hash_params(&a), hash_params(&serde_json::json!({"a": 2})));
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn cache_stats_display_with_hits() {
        let stats = CacheStats { hits: 3, misses: 2 };
        assert_eq!(format!("{stats}"), "3 cached, 2 processed (5 total)");
    }

    #[test]
    fn cache_stats_display_no_hits() {
        let mut stats = CacheStats::default();
        stats.miss();
        stats.miss();
        assert_eq!(format!("{stats}"), "2 processed");
    }
}
