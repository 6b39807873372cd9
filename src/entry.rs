//! One activated project's loaded indexes plus access bookkeeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{StalenessPolicy, ID_INDEX_FILE};
use crate::error::CacheError;
use crate::handle::{HandleTracker, IndexPayload, OpenOptions, VersionedIndexHandle};
use crate::metadata::{IndexMetadataReader, IndexVersion};
use crate::storage::load_compressed;
use crate::text::TextIndex;
use crate::vectors::VectorIndex;

/// Attempts made when a publish lands between opening the individual payloads.
const MAX_LOAD_ATTEMPTS: u32 = 5;
/// Pause before retry `n` is `n` times this, letting an in-flight publish finish.
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Where an indexed chunk lives in the project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Persisted id → location table, stamped with the generation it belongs to.
#[derive(Serialize, Deserialize, Debug)]
pub struct IdTable {
    pub generation: IndexVersion,
    pub locations: HashMap<u64, SourceLocation>,
}

/// Cached state for one project: either fully loaded or empty.
///
/// Mutated only by the coordinator while it holds its lock, so the empty /
/// loaded distinction is all any other caller can observe.
pub struct CacheEntry {
    project: PathBuf,
    collection: PathBuf,
    semantic: Option<VersionedIndexHandle<VectorIndex>>,
    text: Option<VersionedIndexHandle<TextIndex>>,
    locations: HashMap<u64, SourceLocation>,
    last_access: Instant,
    access_count: u64,
}

impl CacheEntry {
    /// Empty entry bound to a project. No I/O.
    pub fn new(project: impl Into<PathBuf>, collection: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            collection: collection.into(),
            semantic: None,
            text: None,
            locations: HashMap::new(),
            last_access: Instant::now(),
            access_count: 0,
        }
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn collection_path(&self) -> &Path {
        &self.collection
    }

    pub fn is_loaded(&self) -> bool {
        self.semantic.is_some()
    }

    /// Version of the loaded generation, if any.
    pub fn version(&self) -> Option<&IndexVersion> {
        self.semantic.as_ref().map(|h| h.version())
    }

    /// Identity of the loaded semantic handle, if any.
    pub fn semantic_handle_id(&self) -> Option<u64> {
        self.semantic.as_ref().map(|h| h.id())
    }

    pub fn semantic(&self) -> Option<&VectorIndex> {
        self.semantic.as_ref().and_then(|h| h.payload())
    }

    pub fn text(&self) -> Option<&TextIndex> {
        self.text.as_ref().and_then(|h| h.payload())
    }

    pub fn location(&self, id: u64) -> Option<&SourceLocation> {
        self.locations.get(&id)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.elapsed()
    }

    /// Whether the on-disk generation differs from the loaded one.
    ///
    /// An empty entry is never stale (it needs a first load, which is a
    /// different condition). Corrupt metadata counts as stale. A missing
    /// sidecar or an I/O error answers according to `policy`.
    pub fn is_stale(&self, policy: StalenessPolicy) -> bool {
        let Some(loaded) = self.version() else {
            return false;
        };
        match IndexMetadataReader::read_version(&self.collection) {
            Ok(current) => {
                let stale = &current != loaded;
                if stale {
                    debug!(project = %self.project.display(), loaded = %loaded, current = %current, "Index generation changed");
                }
                stale
            }
            Err(e @ CacheError::MetadataCorrupt { .. }) => {
                warn!(project = %self.project.display(), error = %e, "Index metadata corrupt, forcing reload");
                true
            }
            Err(e) => {
                let stale = policy == StalenessPolicy::FailClosed;
                warn!(project = %self.project.display(), error = %e, stale, "Index metadata unreadable");
                stale
            }
        }
    }

    /// Close every handle and drop the lookup table. Infallible and idempotent.
    pub fn invalidate(&mut self) {
        let had_handles = self.semantic.is_some() || self.text.is_some();
        if let Some(mut h) = self.semantic.take() {
            h.close();
        }
        if let Some(mut h) = self.text.take() {
            h.close();
        }
        self.locations = HashMap::new();
        if had_handles {
            debug!(project = %self.project.display(), "Cache entry invalidated");
        }
    }

    /// Open fresh handles for every index the collection has and rebuild the
    /// id → location table. All-or-nothing: on failure the entry is empty.
    pub fn load(&mut self, options: &OpenOptions, tracker: &HandleTracker) -> Result<(), CacheError> {
        self.invalidate();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_load(options, tracker) {
                Ok(true) => {
                    info!(
                        project = %self.project.display(),
                        version = %self.version().map(|v| v.to_string()).unwrap_or_default(),
                        vectors = self.semantic().map(|s| s.len()).unwrap_or(0),
                        text = self.text.is_some(),
                        "Index loaded"
                    );
                    return Ok(());
                }
                Ok(false) if attempt < MAX_LOAD_ATTEMPTS => {
                    debug!(project = %self.project.display(), attempt, "Publish raced with load, retrying");
                    self.invalidate();
                    std::thread::sleep(LOAD_RETRY_DELAY * attempt);
                }
                Ok(false) => {
                    self.invalidate();
                    warn!(project = %self.project.display(), attempts = attempt, "Index payloads never matched one generation");
                    return Err(CacheError::load(
                        self.project.display().to_string(),
                        CacheError::open(
                            &self.collection,
                            "index kept changing while loading (payloads do not match the published version)",
                        ),
                    ));
                }
                Err(e) => {
                    self.invalidate();
                    return Err(CacheError::load(self.project.display().to_string(), e));
                }
            }
        }
    }

    /// One load attempt. `Ok(false)` means a publish was observed mid-load.
    ///
    /// Payload files are renamed into place one by one, so the version is
    /// read before and after opening them and every payload's generation
    /// stamp must equal it. Anything else is a mix of two generations.
    fn try_load(&mut self, options: &OpenOptions, tracker: &HandleTracker) -> Result<bool, CacheError> {
        let before = IndexMetadataReader::read_version(&self.collection)?;

        let semantic = VersionedIndexHandle::<VectorIndex>::open(&self.collection, options, tracker)?;
        self.semantic = Some(semantic);

        let table: IdTable = load_compressed(&self.collection.join(ID_INDEX_FILE), "id-index")?;
        let table_generation = table.generation;
        self.locations = table.locations;

        let text_path = self.collection.join(TextIndex::FILE_NAME);
        if text_path.exists() {
            match VersionedIndexHandle::<TextIndex>::open(&self.collection, options, tracker) {
                Ok(text) => self.text = Some(text),
                // removed (or replaced) by a publish between the check and the open
                Err(_) if !text_path.exists() || self.version_moved(&before) => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        let after = IndexMetadataReader::read_metadata(&self.collection)?;
        let current = &after.index_rebuild_uuid;
        let semantic_generation = self.semantic.as_ref().and_then(|h| h.generation());
        let text_generation = self.text.as_ref().and_then(|h| h.generation());

        let consistent = &before == current
            && self.version() == Some(current)
            && semantic_generation == Some(current)
            && &table_generation == current
            && match &self.text {
                Some(_) => text_generation == Some(current),
                None => !after.has_text_index,
            };
        if !consistent {
            debug!(
                project = %self.project.display(),
                published = %current,
                semantic = ?semantic_generation.map(|v| v.as_str()),
                id_table = %table_generation,
                text = ?text_generation.map(|v| v.as_str()),
                "Loaded payloads span more than one generation"
            );
        }
        Ok(consistent)
    }

    fn version_moved(&self, since: &IndexVersion) -> bool {
        IndexMetadataReader::read_version(&self.collection).map_or(true, |v| &v != since)
    }

    /// Record a successful query.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
        self.access_count += 1;
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("project", &self.project)
            .field("loaded", &self.is_loaded())
            .field("version", &self.version())
            .field("access_count", &self.access_count)
            .finish()
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
