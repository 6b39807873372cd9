//! Versioned index handles: one opened payload plus the version it was opened under.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::error::CacheError;
use crate::metadata::{IndexMetadataReader, IndexVersion};

/// Process-unique handle ids, used to check handle identity across calls.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// An on-disk index payload that can sit behind a [`VersionedIndexHandle`].
///
/// Releasing the payload is dropping it: implementations own their OS
/// resources (mapping, descriptor) and free them in `Drop`.
pub trait IndexPayload: Send + Sized {
    /// Short name used in logs ("semantic", "text").
    const KIND: &'static str;
    /// File name inside the collection directory.
    const FILE_NAME: &'static str;

    fn open_at(path: &Path, options: &OpenOptions) -> Result<Self, CacheError>;

    /// Generation the payload was written for, when its format records one.
    fn generation(&self) -> Option<&IndexVersion> {
        None
    }
}

/// Options applied when opening payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Reject a semantic payload whose dimension differs.
    pub expected_dim: Option<usize>,
}

// ─── Live handle accounting ─────────────────────────────────────────

/// Counts handles that are open and not yet closed.
///
/// Shared by all handles a coordinator opens; a non-zero count after
/// the owning entry is gone means a leaked mapping.
#[derive(Debug, Clone, Default)]
pub struct HandleTracker(Arc<AtomicUsize>);

impl HandleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ─── Handle ─────────────────────────────────────────────────────────

/// Owns one open payload together with the [`IndexVersion`] read at open time.
///
/// The pairing never changes after construction. Staleness is detected by
/// comparing [`version`](Self::version) with a fresh metadata read, never by
/// mutating the handle. `close` is idempotent and also runs on drop.
pub struct VersionedIndexHandle<P: IndexPayload> {
    id: u64,
    path: PathBuf,
    version: IndexVersion,
    payload: Option<P>,
    tracker: HandleTracker,
}

impl<P: IndexPayload> VersionedIndexHandle<P> {
    /// Open the payload in `collection_path`, then read the current version.
    ///
    /// The payload is opened first. If a rebuild lands between the two reads,
    /// the recorded version is newer than the mapped bytes; the mapping still
    /// refers to the old, complete file. Callers holding several handles
    /// compare [`IndexPayload::generation`] against the metadata to catch that.
    pub fn open(
        collection_path: &Path,
        options: &OpenOptions,
        tracker: &HandleTracker,
    ) -> Result<Self, CacheError> {
        let path = collection_path.join(P::FILE_NAME);
        let payload = P::open_at(&path, options)?;
        let version = IndexMetadataReader::read_version(collection_path)
            .map_err(|e| CacheError::open(&path, format!("no published version: {}", e)))?;

        tracker.acquire();
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(kind = P::KIND, handle = id, version = %version, path = %path.display(), "Opened index handle");

        Ok(Self {
            id,
            path,
            version,
            payload: Some(payload),
            tracker: tracker.clone(),
        })
    }

    /// Version recorded at open time.
    pub fn version(&self) -> &IndexVersion {
        &self.version
    }

    /// Process-unique identity of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.payload.is_some()
    }

    /// Generation stamped into the open payload, if it carries one.
    pub fn generation(&self) -> Option<&IndexVersion> {
        self.payload.as_ref().and_then(|p| p.generation())
    }

    /// The open payload, or `None` once closed.
    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    /// Release the payload. Safe to call any number of times.
    pub fn close(&mut self) {
        let Some(payload) = self.payload.take() else {
            return;
        };
        let released = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || drop(payload)));
        if released.is_err() {
            warn!(kind = P::KIND, handle = self.id, path = %self.path.display(), "Panic while releasing index payload");
        }
        self.tracker.release();
        debug!(kind = P::KIND, handle = self.id, "Closed index handle");
    }
}

impl<P: IndexPayload> Drop for VersionedIndexHandle<P> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: IndexPayload> std::fmt::Debug for VersionedIndexHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedIndexHandle")
            .field("kind", &P::KIND)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{IndexMetadata, Space, METADATA_FORMAT_VERSION};

    /// Minimal payload: the file must exist and be non-empty.
    struct RawFile(#[allow(dead_code)] Vec<u8>);

    impl IndexPayload for RawFile {
        const KIND: &'static str = "raw";
        const FILE_NAME: &'static str = "raw.bin";

        fn open_at(path: &Path, _options: &OpenOptions) -> Result<Self, CacheError> {
            let bytes = std::fs::read(path).map_err(|e| CacheError::open(path, e))?;
            if bytes.is_empty() {
                return Err(CacheError::open(path, "empty payload"));
            }
            Ok(RawFile(bytes))
        }
    }

    fn publish(dir: &Path, version: &str) {
        std::fs::write(dir.join("raw.bin"), b"payload").unwrap();
        IndexMetadata {
            format_version: METADATA_FORMAT_VERSION,
            vector_dim: 1,
            space: Space::Cosine,
            vector_count: 1,
            m: 16,
            ef_construction: 200,
            last_rebuild: 0,
            index_rebuild_uuid: IndexVersion::from(version),
            has_text_index: false,
        }
        .write_to(dir)
        .unwrap();
    }

    #[test]
    fn test_open_records_version() {
        let tmp = tempfile::tempdir().unwrap();
        publish(tmp.path(), "v1");
        let tracker = HandleTracker::new();
        let h = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap();
        assert_eq!(h.version(), &IndexVersion::from("v1"));
        assert!(h.generation().is_none(), "raw payloads carry no stamp");
        assert!(h.is_open());
        assert_eq!(tracker.live(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        publish(tmp.path(), "v1");
        let tracker = HandleTracker::new();
        let mut h = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap();
        h.close();
        h.close();
        assert!(!h.is_open());
        assert!(h.payload().is_none());
        assert_eq!(tracker.live(), 0);
        drop(h);
        assert_eq!(tracker.live(), 0, "drop after close must not release twice");
    }

    #[test]
    fn test_drop_closes() {
        let tmp = tempfile::tempdir().unwrap();
        publish(tmp.path(), "v1");
        let tracker = HandleTracker::new();
        {
            let _h = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap();
            assert_eq!(tracker.live(), 1);
        }
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_open_missing_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = HandleTracker::new();
        let err = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap_err();
        assert!(matches!(err, CacheError::Open { .. }));
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_open_without_metadata_fails() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("raw.bin"), b"payload").unwrap();
        let tracker = HandleTracker::new();
        let err = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap_err();
        assert!(err.to_string().contains("no published version"));
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let tmp = tempfile::tempdir().unwrap();
        publish(tmp.path(), "v1");
        let tracker = HandleTracker::new();
        let a = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap();
        let b = VersionedIndexHandle::<RawFile>::open(tmp.path(), &OpenOptions::default(), &tracker).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(tracker.live(), 2);
    }
}
