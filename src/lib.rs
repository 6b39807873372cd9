//! # cidx: resident code index daemon
//!
//! Keeps one project's semantic (memory-mapped vector) index and full-text index
//! loaded across queries, and reloads them when a background rebuild publishes
//! a new generation on disk.
//!
//! ## Library usage
//!
//! The crate is primarily a daemon / CLI, but the cache types are exposed as a
//! library for benchmarking and integration testing.
//!
//! ```no_run
//! use cidx::{CacheConfig, DaemonCache, QueryRequest};
//!
//! let cache = DaemonCache::new(CacheConfig::default());
//! cache.start();
//! let response = cache.query(
//!     std::path::Path::new("/work/my-project"),
//!     &QueryRequest::FullText { terms: vec!["httpclient".into()], mode_and: false, regex: false, limit: 10 },
//! );
//! cache.shutdown();
//! # let _ = response;
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod handle;
pub mod metadata;
pub mod rebuild;
pub mod storage;
pub mod text;
pub mod ttl;
pub mod vectors;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{CacheConfig, StalenessPolicy};
pub use coordinator::{
    CacheCounters, CacheStatus, DaemonCache, LoadOutcome, QueryHit, QueryRequest, QueryResponse,
};
pub use entry::CacheEntry;
pub use error::CacheError;
pub use handle::{HandleTracker, IndexPayload, OpenOptions, VersionedIndexHandle};
pub use metadata::{IndexMetadata, IndexMetadataReader, IndexVersion, Space};
pub use rebuild::{IndexPublisher, IndexRecord, PublishParams};
pub use text::TextIndex;
pub use vectors::VectorIndex;

/// Default minimum token length used for full-text indexing and search.
/// Tokens shorter than this are discarded during tokenization.
pub const DEFAULT_MIN_TOKEN_LEN: usize = 2;

// ─── Small shared helpers ───────────────────────────────────────────

/// Strip the `\\?\` extended-length path prefix that Windows canonicalize adds.
#[must_use]
pub fn clean_path(p: &str) -> String {
    p.strip_prefix(r"\\?\").unwrap_or(p).to_string()
}

/// Seconds since the unix epoch, saturating to zero on a skewed clock.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Tokenize a line of text into lowercase tokens.
///
/// Splits on non-alphanumeric characters (except `_`),
/// filters by minimum length, and lowercases all tokens.
///
/// # Examples
///
/// ```
/// use cidx::tokenize;
///
/// let tokens = tokenize("private readonly HttpClient _client;", 2);
/// assert!(tokens.contains(&"private".to_string()));
/// assert!(tokens.contains(&"httpclient".to_string()));
/// assert!(tokens.contains(&"_client".to_string()));
/// ```
#[must_use]
pub fn tokenize(line: &str, min_len: usize) -> Vec<String> {
    line.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() >= min_len)
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("hello world", 2);
        assert_eq!(tokens, vec!["hello", "world"]);
    }

    #[test]
    fn test_tokenize_code() {
        let tokens = tokenize("private readonly HttpClient _client;", 2);
        assert_eq!(
            tokens,
            vec!["private", "readonly", "httpclient", "_client"]
        );
    }

    #[test]
    fn test_tokenize_min_length() {
        let tokens = tokenize("a bb ccc", 2);
        assert_eq!(tokens, vec!["bb", "ccc"]);
    }

    #[test]
    fn test_clean_path_strips_prefix() {
        assert_eq!(clean_path(r"\\?\C:\Users\test"), r"C:\Users\test");
    }

    #[test]
    fn test_clean_path_unix_style() {
        assert_eq!(clean_path("/usr/bin/ls"), "/usr/bin/ls");
    }

    #[test]
    fn test_now_secs_is_after_2020() {
        assert!(now_secs() > 1_577_836_800);
    }
}

// ─── Property-based tests (proptest) ─────────────────────────────────
