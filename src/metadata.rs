//! Index metadata sidecar: the small JSON record published next to the
//! semantic payload, carrying the current [`IndexVersion`].
//!
//! The sidecar is always rewritten after the payload is in place, so a reader
//! that observes a version is guaranteed the matching payload is complete.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::METADATA_FILE;
use crate::error::CacheError;
use crate::storage::write_json_atomic;

/// Current metadata format version.
pub const METADATA_FORMAT_VERSION: u32 = 1;

// ─── IndexVersion ───────────────────────────────────────────────────

/// Opaque identifier of one generation of the on-disk index.
///
/// Only compared for equality. Generated as a random UUID by the publisher;
/// any other non-empty token written by an external rebuilder is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexVersion(String);

impl IndexVersion {
    /// Fresh random version (UUID v4).
    pub fn generate() -> Self {
        IndexVersion(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IndexVersion {
    fn from(s: &str) -> Self {
        IndexVersion(s.to_string())
    }
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Distance space ─────────────────────────────────────────────────

/// Distance metric the semantic index was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    #[default]
    Cosine,
    L2,
    Ip,
}

impl Space {
    /// Code stored in the binary payload header.
    pub fn code(self) -> u32 {
        match self {
            Space::Cosine => 0,
            Space::L2 => 1,
            Space::Ip => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Space> {
        match code {
            0 => Some(Space::Cosine),
            1 => Some(Space::L2),
            2 => Some(Space::Ip),
            _ => None,
        }
    }
}

impl std::str::FromStr for Space {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Space::Cosine),
            "l2" => Ok(Space::L2),
            "ip" | "dot" => Ok(Space::Ip),
            other => Err(format!("unknown space '{}' (expected cosine|l2|ip)", other)),
        }
    }
}

// ─── IndexMetadata ──────────────────────────────────────────────────

/// The metadata sidecar record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub vector_dim: usize,
    pub space: Space,
    pub vector_count: usize,
    #[serde(rename = "M")]
    pub m: usize,
    pub ef_construction: usize,
    /// Unix seconds of the last full rebuild or incremental update.
    pub last_rebuild: u64,
    pub index_rebuild_uuid: IndexVersion,
    /// Whether a full-text payload was published with this generation.
    #[serde(default)]
    pub has_text_index: bool,
}

fn default_format_version() -> u32 {
    METADATA_FORMAT_VERSION
}

impl IndexMetadata {
    /// Rewrite the sidecar in `collection_path` (temp file + rename).
    pub fn write_to(&self, collection_path: &Path) -> Result<(), CacheError> {
        write_json_atomic(&metadata_path(collection_path), self)
    }
}

/// Path of the metadata sidecar inside a collection directory.
pub fn metadata_path(collection_path: &Path) -> PathBuf {
    collection_path.join(METADATA_FILE)
}

// ─── Reader ─────────────────────────────────────────────────────────

/// Reads the metadata sidecar without touching the (large) index payload.
///
/// Stateless and lock-free: every call sees the sidecar as of its own read,
/// which is consistent with rename-based publication.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexMetadataReader;

impl IndexMetadataReader {
    /// Read the whole metadata record.
    ///
    /// Returns [`CacheError::MetadataMissing`] when the sidecar does not exist,
    /// [`CacheError::MetadataCorrupt`] when it cannot be parsed or carries an
    /// empty version, and [`CacheError::Io`] for other read failures.
    pub fn read_metadata(collection_path: &Path) -> Result<IndexMetadata, CacheError> {
        let path = metadata_path(collection_path);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::MetadataMissing {
                    path: path.display().to_string(),
                });
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(CacheError::MetadataCorrupt {
                    path: path.display().to_string(),
                    message: format!("not valid UTF-8: {}", e),
                });
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let meta: IndexMetadata =
            serde_json::from_str(&text).map_err(|e| CacheError::MetadataCorrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if meta.index_rebuild_uuid.as_str().trim().is_empty() {
            return Err(CacheError::MetadataCorrupt {
                path: path.display().to_string(),
                message: "empty index_rebuild_uuid".to_string(),
            });
        }
        Ok(meta)
    }

    /// Read just the current [`IndexVersion`].
    pub fn read_version(collection_path: &Path) -> Result<IndexVersion, CacheError> {
        let meta = Self::read_metadata(collection_path)?;
        trace!(collection = %collection_path.display(), version = %meta.index_rebuild_uuid, "Read index version");
        Ok(meta.index_rebuild_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(version: &str) -> IndexMetadata {
        IndexMetadata {
            format_version: METADATA_FORMAT_VERSION,
            vector_dim: 4,
            space: Space::Cosine,
            vector_count: 2,
            m: 16,
            ef_construction: 200,
            last_rebuild: 1_700_000_000,
            index_rebuild_uuid: IndexVersion::from(version),
            has_text_index: false,
        }
    }

    #[test]
    fn test_generated_versions_differ() {
        let a = IndexVersion::generate();
        let b = IndexVersion::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_read_version_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        sample_meta("v-one").write_to(tmp.path()).unwrap();
        let v = IndexMetadataReader::read_version(tmp.path()).unwrap();
        assert_eq!(v, IndexVersion::from("v-one"));
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(sample_meta("abc")).unwrap();
        assert_eq!(json["M"], 16);
        assert_eq!(json["space"], "cosine");
        assert_eq!(json["index_rebuild_uuid"], "abc");
        assert_eq!(json["vector_dim"], 4);
        assert!(json.get("m").is_none());
    }

    #[test]
    fn test_accepts_record_without_optional_fields() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            metadata_path(tmp.path()),
            r#"{"vector_dim":8,"space":"l2","vector_count":1,"M":16,"ef_construction":200,
                "last_rebuild":5,"index_rebuild_uuid":"external-token"}"#,
        )
        .unwrap();
        let meta = IndexMetadataReader::read_metadata(tmp.path()).unwrap();
        assert_eq!(meta.format_version, METADATA_FORMAT_VERSION);
        assert_eq!(meta.space, Space::L2);
        assert!(!meta.has_text_index);
    }

    #[test]
    fn test_missing_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let err = IndexMetadataReader::read_version(tmp.path()).unwrap_err();
        assert!(matches!(err, CacheError::MetadataMissing { .. }));
    }

    #[test]
    fn test_corrupt_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(metadata_path(tmp.path()), "{ not json").unwrap();
        let err = IndexMetadataReader::read_version(tmp.path()).unwrap_err();
        assert!(matches!(err, CacheError::MetadataCorrupt { .. }));
    }

    #[test]
    fn test_empty_version_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        sample_meta("  ").write_to(tmp.path()).unwrap();
        let err = IndexMetadataReader::read_version(tmp.path()).unwrap_err();
        assert!(matches!(err, CacheError::MetadataCorrupt { .. }));
    }

    #[test]
    fn test_space_codes() {
        for space in [Space::Cosine, Space::L2, Space::Ip] {
            assert_eq!(Space::from_code(space.code()), Some(space));
        }
        assert_eq!(Space::from_code(99), None);
    }

    #[test]
    fn test_space_from_str() {
        assert_eq!("Cosine".parse::<Space>(), Ok(Space::Cosine));
        assert_eq!("dot".parse::<Space>(), Ok(Space::Ip));
        assert!("hamming".parse::<Space>().is_err());
    }
}
