//! Cache configuration and on-disk index layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clean_path;

/// Directory (relative to the project root) holding all collections.
pub const INDEX_DIR: &str = ".code-indexer/index";

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "code_index";

/// Semantic payload file name inside a collection directory.
pub const VECTOR_FILE: &str = "hnsw_index.bin";

/// id → source location table.
pub const ID_INDEX_FILE: &str = "id_index.bin";

/// Full-text payload file name.
pub const TEXT_FILE: &str = "fts_index.bin";

/// Metadata sidecar file name.
pub const METADATA_FILE: &str = "collection_meta.json";

/// What `is_stale` answers when the metadata sidecar cannot be read.
///
/// Corrupt metadata is always treated as stale; this only governs the
/// missing-file and I/O-error cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalenessPolicy {
    /// Keep serving the loaded index.
    #[default]
    FailOpen,
    /// Force a reload attempt.
    FailClosed,
}

impl std::str::FromStr for StalenessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(StalenessPolicy::FailOpen),
            "closed" | "fail-closed" => Ok(StalenessPolicy::FailClosed),
            other => Err(format!("unknown staleness policy '{}' (expected open|closed)", other)),
        }
    }
}

/// Runtime configuration of a [`crate::DaemonCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Idle time after which the TTL loop evicts the loaded entry.
    pub ttl: Duration,
    /// How often the TTL loop wakes up.
    pub poll_interval: Duration,
    /// Collection name under [`INDEX_DIR`].
    pub collection: String,
    /// Index directory relative to the project root.
    pub index_dir: PathBuf,
    pub staleness_policy: StalenessPolicy,
    /// Reject semantic payloads whose dimension differs from this.
    pub expected_dim: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            poll_interval: Duration::from_secs(30),
            collection: DEFAULT_COLLECTION.to_string(),
            index_dir: PathBuf::from(INDEX_DIR),
            staleness_policy: StalenessPolicy::FailOpen,
            expected_dim: None,
        }
    }
}

impl CacheConfig {
    /// Collection directory for a project under this configuration.
    pub fn collection_path_for(&self, project: &Path) -> PathBuf {
        project.join(&self.index_dir).join(&self.collection)
    }
}

/// Canonical, prefix-free form of a project path used as the cache key.
/// Falls back to the path as given when it cannot be canonicalized.
pub fn normalize_project_path(project: &Path) -> PathBuf {
    let canonical = fs::canonicalize(project).unwrap_or_else(|_| project.to_path_buf());
    PathBuf::from(clean_path(&canonical.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.ttl, Duration::from_secs(600));
        assert_eq!(cfg.collection, "code_index");
        assert_eq!(cfg.staleness_policy, StalenessPolicy::FailOpen);
        assert!(cfg.expected_dim.is_none());
    }

    #[test]
    fn test_collection_path_layout() {
        let cfg = CacheConfig::default();
        let path = cfg.collection_path_for(Path::new("/work/app"));
        assert_eq!(
            path,
            Path::new("/work/app").join(".code-indexer/index").join("code_index")
        );
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("open".parse::<StalenessPolicy>(), Ok(StalenessPolicy::FailOpen));
        assert_eq!("Fail-Closed".parse::<StalenessPolicy>(), Ok(StalenessPolicy::FailClosed));
        assert!("maybe".parse::<StalenessPolicy>().is_err());
    }

    #[test]
    fn test_normalize_nonexistent_path_passthrough() {
        let p = Path::new("/definitely/not/here/xyz");
        assert_eq!(normalize_project_path(p), PathBuf::from("/definitely/not/here/xyz"));
    }

    #[test]
    fn test_normalize_resolves_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a");
        fs::create_dir(&nested).unwrap();
        let dotted = nested.join("..").join("a");
        assert_eq!(normalize_project_path(&dotted), normalize_project_path(&nested));
    }
}
