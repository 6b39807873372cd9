//! Shared fixtures for daemon tests.

use std::path::Path;

use cidx::{CacheConfig, IndexPublisher, IndexRecord};

/// Publish three records (ids 1..=3, 3-dim vectors, text containing `retry_policy`)
/// into the default collection of `dir`.
pub(crate) fn publish_fixture(dir: &Path) -> cidx::IndexVersion {
    let collection = CacheConfig::default().collection_path_for(dir);
    let records: Vec<IndexRecord> = (1..=3u64)
        .map(|id| IndexRecord {
            id,
            path: format!("src/mod_{}.rs", id),
            start_line: 1,
            end_line: 20,
            vector: vec![id as f32, 1.0, 0.0],
            text: Some(format!("fn handler_{}() {{ retry_policy }}", id)),
        })
        .collect();
    IndexPublisher::new(collection).publish(&records).unwrap()
}
