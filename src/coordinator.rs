//! The per-process cache coordinator.
//!
//! [`DaemonCache`] owns at most one [`CacheEntry`] and a single mutex. Every
//! query runs "check freshness → reload if needed → execute → touch" inside
//! one lock section, and the TTL loop evicts under the same lock, so a handle
//! can never be swapped or closed while a query is using it.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{normalize_project_path, CacheConfig};
use crate::entry::{CacheEntry, SourceLocation};
use crate::error::CacheError;
use crate::handle::{HandleTracker, OpenOptions};
use crate::metadata::IndexVersion;
use crate::ttl::TtlEvictionLoop;

fn default_limit() -> usize {
    10
}

/// One query against the active project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueryRequest {
    /// Nearest neighbours of `vector` in the semantic index.
    Semantic {
        vector: Vec<f32>,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    /// TF-IDF ranked full-text search.
    #[serde(rename = "text")]
    FullText {
        terms: Vec<String>,
        /// Require every term (AND) instead of any (OR).
        #[serde(default, rename = "all")]
        mode_and: bool,
        #[serde(default)]
        regex: bool,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    /// Source location of one indexed chunk.
    Lookup { id: u64 },
}

/// What `ensure_loaded` had to do before the entry could serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadOutcome {
    /// Loaded entry for this project, version unchanged. No I/O beyond the metadata read.
    Fresh,
    /// First load for this project (no entry, or an empty one).
    Loaded,
    /// Same project, new on-disk version: handles were replaced.
    Reloaded,
    /// Another project's entry was discarded first.
    Switched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub id: u64,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Matching lines within the chunk (full-text only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub project: String,
    /// Index generation the query was answered from.
    pub version: IndexVersion,
    pub outcome: LoadOutcome,
    pub hits: Vec<QueryHit>,
    pub elapsed_ms: f64,
}

/// Lifetime counters of a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    pub loads: u64,
    pub reloads: u64,
    pub switches: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub queries: u64,
}

/// Serializable snapshot of the coordinator, for `status` and `info`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub project: Option<String>,
    pub version: Option<IndexVersion>,
    pub loaded: bool,
    pub access_count: u64,
    pub idle_secs: Option<u64>,
    pub vector_count: Option<usize>,
    pub has_text_index: bool,
    pub live_handles: usize,
    pub ttl_secs: u64,
    pub ttl_running: bool,
    #[serde(flatten)]
    pub counters: CacheCounters,
}

/// Everything behind the coordinator mutex.
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) entry: Option<CacheEntry>,
    pub(crate) counters: CacheCounters,
}

/// Lock the state, recovering from poisoning.
///
/// State is consistent at every lock boundary (the entry is either loaded or
/// empty), so a panic in another lock holder leaves nothing half-done.
fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop the entry if it has been idle for at least `ttl`. Returns whether
/// anything was evicted. Shared by the TTL loop and [`DaemonCache::evict_if_idle`].
pub(crate) fn evict_idle(state: &Mutex<CacheState>, ttl: Duration) -> bool {
    let mut guard = lock(state);
    let idle = match guard.entry.as_ref() {
        Some(entry) if entry.idle_for() >= ttl => entry.idle_for(),
        _ => return false,
    };
    if let Some(mut entry) = guard.entry.take() {
        info!(
            project = %entry.project().display(),
            idle_secs = idle.as_secs(),
            accesses = entry.access_count(),
            "Evicting idle index cache entry"
        );
        entry.invalidate();
    }
    guard.counters.evictions += 1;
    true
}

/// Daemon-resident index cache for one project at a time.
///
/// Construct one per process and share it (`Arc<DaemonCache>`) with every
/// request handler.
pub struct DaemonCache {
    state: Arc<Mutex<CacheState>>,
    config: CacheConfig,
    tracker: HandleTracker,
    ttl: Mutex<TtlEvictionLoop>,
}

impl DaemonCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            config,
            tracker: HandleTracker::new(),
            ttl: Mutex::new(TtlEvictionLoop::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Start the TTL eviction loop. No-op when already running.
    pub fn start(&self) {
        let mut ttl = self.ttl.lock().unwrap_or_else(PoisonError::into_inner);
        if ttl.is_running() {
            return;
        }
        *ttl = TtlEvictionLoop::spawn(self.state.clone(), self.config.ttl, self.config.poll_interval);
    }

    /// Make sure the entry for `project` is loaded and matches the on-disk version.
    pub fn ensure_loaded(&self, project: &Path) -> Result<LoadOutcome, CacheError> {
        let mut guard = lock(&self.state);
        self.ensure_loaded_locked(&mut guard, project)
    }

    /// Run `f` against the fresh, loaded entry for `project` without releasing
    /// the lock in between. Counts as an access.
    pub fn with_entry<R>(
        &self,
        project: &Path,
        f: impl FnOnce(&CacheEntry) -> R,
    ) -> Result<(LoadOutcome, R), CacheError> {
        let mut guard = lock(&self.state);
        let outcome = self.ensure_loaded_locked(&mut guard, project)?;
        let Some(entry) = guard.entry.as_mut() else {
            return Err(CacheError::InvalidQuery("no index loaded".to_string()));
        };
        let result = f(&*entry);
        entry.touch();
        Ok((outcome, result))
    }

    /// Answer `request` from the entry for `project`, reloading first when a
    /// rebuild has published a new version.
    pub fn query(&self, project: &Path, request: &QueryRequest) -> Result<QueryResponse, CacheError> {
        let start = Instant::now();
        let mut guard = lock(&self.state);
        let outcome = self.ensure_loaded_locked(&mut guard, project)?;

        let state = &mut *guard;
        let Some(entry) = state.entry.as_mut() else {
            return Err(CacheError::InvalidQuery("no index loaded".to_string()));
        };
        let hits = execute(entry, request)?;
        entry.touch();
        state.counters.queries += 1;

        let response = QueryResponse {
            project: entry.project().display().to_string(),
            version: entry.version().cloned().unwrap_or_else(|| IndexVersion::from("")),
            outcome,
            hits,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        debug!(
            project = %response.project,
            version = %response.version,
            outcome = ?outcome,
            hits = response.hits.len(),
            elapsed_ms = format_args!("{:.2}", response.elapsed_ms),
            "Query served"
        );
        Ok(response)
    }

    /// Force the next query to reload, whatever the metadata says.
    /// Keeps the project binding.
    pub fn invalidate_all(&self) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if let Some(entry) = state.entry.as_mut() {
            info!(project = %entry.project().display(), "Invalidating index cache");
            entry.invalidate();
            state.counters.invalidations += 1;
        }
    }

    /// Invalidate the entry only if it belongs to `project`. Returns whether
    /// handles were released. Another project's entry is left alone.
    pub fn invalidate_project(&self, project: &Path) -> bool {
        let project = normalize_project_path(project);
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        match state.entry.as_mut() {
            Some(entry) if entry.project() == project.as_path() && entry.is_loaded() => {
                info!(project = %project.display(), "Invalidating index cache");
                entry.invalidate();
                state.counters.invalidations += 1;
                true
            }
            Some(entry) => {
                debug!(active = %entry.project().display(), requested = %project.display(), "Active entry not affected by invalidation");
                false
            }
            None => false,
        }
    }

    /// Evict the entry now if it has been idle for the configured TTL.
    pub fn evict_if_idle(&self) -> bool {
        evict_idle(&self.state, self.config.ttl)
    }

    /// Stop the TTL loop, close every handle and drop the entry. Idempotent.
    pub fn shutdown(&self) {
        self.ttl.lock().unwrap_or_else(PoisonError::into_inner).stop();

        let mut guard = lock(&self.state);
        if let Some(mut entry) = guard.entry.take() {
            info!(project = %entry.project().display(), "Shutting down index cache");
            entry.invalidate();
        }
    }

    /// Number of index handles currently open.
    pub fn live_handles(&self) -> usize {
        self.tracker.live()
    }

    pub fn status(&self) -> CacheStatus {
        let ttl_running = self.ttl.lock().unwrap_or_else(PoisonError::into_inner).is_running();
        let guard = lock(&self.state);
        let entry = guard.entry.as_ref();
        CacheStatus {
            project: entry.map(|e| e.project().display().to_string()),
            version: entry.and_then(|e| e.version().cloned()),
            loaded: entry.is_some_and(CacheEntry::is_loaded),
            access_count: entry.map_or(0, CacheEntry::access_count),
            idle_secs: entry.map(|e| e.idle_for().as_secs()),
            vector_count: entry.and_then(|e| e.semantic()).map(|s| s.len()),
            has_text_index: entry.is_some_and(|e| e.text().is_some()),
            live_handles: self.tracker.live(),
            ttl_secs: self.config.ttl.as_secs(),
            ttl_running,
            counters: guard.counters,
        }
    }

    /// The freshness state machine. Caller holds the lock.
    fn ensure_loaded_locked(&self, state: &mut CacheState, project: &Path) -> Result<LoadOutcome, CacheError> {
        let project = normalize_project_path(project);

        let outcome = match state.entry.as_ref() {
            Some(entry) if entry.project() == project.as_path() => {
                if !entry.is_loaded() {
                    LoadOutcome::Loaded
                } else if entry.is_stale(self.config.staleness_policy) {
                    info!(project = %project.display(), "Index rebuilt on disk, reloading");
                    LoadOutcome::Reloaded
                } else {
                    return Ok(LoadOutcome::Fresh);
                }
            }
            Some(_) => LoadOutcome::Switched,
            None => LoadOutcome::Loaded,
        };

        if outcome == LoadOutcome::Switched {
            if let Some(mut old) = state.entry.take() {
                info!(from = %old.project().display(), to = %project.display(), "Switching active project");
                old.invalidate();
            }
        }

        let collection = self.config.collection_path_for(&project);
        let entry = state
            .entry
            .get_or_insert_with(|| CacheEntry::new(project.clone(), collection));
        let options = OpenOptions {
            expected_dim: self.config.expected_dim,
        };

        match entry.load(&options, &self.tracker) {
            Ok(()) => {
                match outcome {
                    LoadOutcome::Reloaded => state.counters.reloads += 1,
                    LoadOutcome::Switched => state.counters.switches += 1,
                    _ => state.counters.loads += 1,
                }
                Ok(outcome)
            }
            Err(e) => {
                state.counters.load_failures += 1;
                warn!(project = %project.display(), error = %e, "Index load failed");
                Err(e)
            }
        }
    }
}

impl Drop for DaemonCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DaemonCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonCache")
            .field("config", &self.config)
            .field("live_handles", &self.tracker.live())
            .finish()
    }
}

/// Run one request against a loaded entry.
fn execute(entry: &CacheEntry, request: &QueryRequest) -> Result<Vec<QueryHit>, CacheError> {
    match request {
        QueryRequest::Semantic { vector, limit } => {
            let semantic = entry
                .semantic()
                .ok_or_else(|| CacheError::InvalidQuery("semantic index not loaded".to_string()))?;
            Ok(semantic
                .search(vector, *limit)?
                .into_iter()
                .map(|(id, score)| QueryHit {
                    id,
                    score: score as f64,
                    location: entry.location(id).cloned(),
                    lines: Vec::new(),
                })
                .collect())
        }
        QueryRequest::FullText { terms, mode_and, regex, limit } => {
            let text = entry
                .text()
                .ok_or_else(|| CacheError::InvalidQuery("project has no full-text index".to_string()))?;
            Ok(text
                .search(terms, *mode_and, *regex, *limit)?
                .into_iter()
                .map(|hit| QueryHit {
                    id: hit.id,
                    score: hit.score,
                    location: entry.location(hit.id).cloned(),
                    lines: hit.lines,
                })
                .collect())
        }
        QueryRequest::Lookup { id } => Ok(entry
            .location(*id)
            .map(|location| QueryHit {
                id: *id,
                score: 1.0,
                location: Some(location.clone()),
                lines: Vec::new(),
            })
            .into_iter()
            .collect()),
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
