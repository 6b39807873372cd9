//! Shared test helpers: temporary projects with published indexes.

use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::metadata::IndexVersion;
use crate::rebuild::{IndexPublisher, IndexRecord};

/// A chunk record with a one-line source location and optional text.
pub(crate) fn record(id: u64, vector: Vec<f32>, text: Option<&str>) -> IndexRecord {
    IndexRecord {
        id,
        path: format!("src/chunk_{}.rs", id),
        start_line: id as u32 * 10,
        end_line: id as u32 * 10 + 9,
        vector,
        text: text.map(str::to_string),
    }
}

/// Unit basis vector `e_i` in `dim` dimensions.
pub(crate) fn basis(dim: usize, i: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[i] = 1.0;
    v
}

/// A temporary project directory with a publisher for its default collection.
pub(crate) struct TestProject {
    pub dir: tempfile::TempDir,
    pub publisher: IndexPublisher,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp project");
        let collection = CacheConfig::default().collection_path_for(dir.path());
        Self {
            publisher: IndexPublisher::new(collection),
            dir,
        }
    }

    /// Project with `n` records (ids 1..=n, 4-dim basis vectors, text "chunk<id> shared").
    pub fn with_records(n: u64) -> (Self, IndexVersion) {
        let project = Self::new();
        let version = project.publish(n);
        (project, version)
    }

    pub fn publish(&self, n: u64) -> IndexVersion {
        let records: Vec<IndexRecord> = (1..=n)
            .map(|id| record(id, basis(4, (id as usize - 1) % 4), Some(&format!("chunk{} shared", id))))
            .collect();
        self.publisher.publish(&records).expect("publish test index")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn collection(&self) -> PathBuf {
        self.publisher.collection_path().to_path_buf()
    }
}
