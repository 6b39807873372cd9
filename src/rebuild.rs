//! Index publisher: the writer side of the cache protocol.
//!
//! Plays the background rebuilder: the new [`IndexVersion`] is chosen first
//! and stamped into every payload, each payload is written to a temporary
//! file and renamed into place, and only after all payloads are durable is the
//! metadata sidecar rewritten to name that version. It never touches the
//! cache and takes no lock shared with it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ID_INDEX_FILE, TEXT_FILE, VECTOR_FILE};
use crate::entry::{IdTable, SourceLocation};
use crate::error::CacheError;
use crate::handle::{IndexPayload, OpenOptions};
use crate::metadata::{IndexMetadata, IndexMetadataReader, IndexVersion, Space, METADATA_FORMAT_VERSION};
use crate::storage::{load_compressed, save_compressed};
use crate::text::TextIndex;
use crate::vectors::{write_vector_payload, VectorIndex};
use crate::now_secs;

/// One indexed chunk, as produced by the embedding pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: u64,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Construction parameters recorded in the metadata sidecar.
#[derive(Debug, Clone, Copy)]
pub struct PublishParams {
    pub space: Space,
    pub m: usize,
    pub ef_construction: usize,
}

impl Default for PublishParams {
    fn default() -> Self {
        Self {
            space: Space::Cosine,
            m: 16,
            ef_construction: 200,
        }
    }
}

/// Publishes index generations into one collection directory.
#[derive(Debug, Clone)]
pub struct IndexPublisher {
    collection: PathBuf,
    params: PublishParams,
}

impl IndexPublisher {
    pub fn new(collection_path: impl Into<PathBuf>) -> Self {
        Self {
            collection: collection_path.into(),
            params: PublishParams::default(),
        }
    }

    pub fn with_params(mut self, params: PublishParams) -> Self {
        self.params = params;
        self
    }

    pub fn collection_path(&self) -> &Path {
        &self.collection
    }

    /// Full rebuild: replace the collection with exactly `records`.
    pub fn publish(&self, records: &[IndexRecord]) -> Result<IndexVersion, CacheError> {
        let start = Instant::now();
        let dim = self.uniform_dim(records, None)?;

        let rows: Vec<(u64, Vec<f32>)> = records.iter().map(|r| (r.id, r.vector.clone())).collect();
        let locations: HashMap<u64, SourceLocation> = records.iter().map(|r| (r.id, location_of(r))).collect();
        let text = if records.iter().any(|r| r.text.is_some()) {
            Some(TextIndex::build(
                records.iter().map(|r| (r.id, r.text.as_deref().unwrap_or(""))),
            ))
        } else {
            None
        };

        let version = self.write_generation(dim, &rows, locations, text)?;
        info!(
            collection = %self.collection.display(),
            version = %version,
            vectors = rows.len(),
            elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
            "Published full index rebuild"
        );
        Ok(version)
    }

    /// Incremental update: upsert `records`, drop `deleted` ids, publish a new version.
    /// Falls back to a full publish when nothing has been published yet.
    pub fn update(&self, records: &[IndexRecord], deleted: &[u64]) -> Result<IndexVersion, CacheError> {
        let current = match IndexMetadataReader::read_metadata(&self.collection) {
            Ok(meta) => meta,
            Err(CacheError::MetadataMissing { .. }) => return self.publish(records),
            Err(e) => return Err(e),
        };
        let start = Instant::now();
        let dim = self.uniform_dim(records, Some(current.vector_dim))?;

        let replaced: HashSet<u64> = records.iter().map(|r| r.id).chain(deleted.iter().copied()).collect();

        let existing = VectorIndex::open_at(&self.collection.join(VECTOR_FILE), &OpenOptions::default())?;
        let mut rows: Vec<(u64, Vec<f32>)> = existing
            .rows()
            .into_iter()
            .filter(|(id, _)| !replaced.contains(id))
            .collect();
        drop(existing);
        rows.extend(records.iter().map(|r| (r.id, r.vector.clone())));

        let table: IdTable = load_compressed(&self.collection.join(ID_INDEX_FILE), "id-index")?;
        let mut locations = table.locations;
        locations.retain(|id, _| !replaced.contains(id));
        locations.extend(records.iter().map(|r| (r.id, location_of(r))));

        let text_path = self.collection.join(TEXT_FILE);
        let has_new_text = records.iter().any(|r| r.text.is_some());
        let text = if text_path.exists() || has_new_text {
            let mut text = if text_path.exists() {
                TextIndex::open_at(&text_path, &OpenOptions::default())?
            } else {
                TextIndex::default()
            };
            text.remove_docs(&replaced);
            for r in records {
                text.add_doc(r.id, r.text.as_deref().unwrap_or(""));
            }
            text.created_at = now_secs();
            Some(text)
        } else {
            None
        };

        let version = self.write_generation(dim, &rows, locations, text)?;
        info!(
            collection = %self.collection.display(),
            version = %version,
            upserted = records.len(),
            deleted = deleted.len(),
            vectors = rows.len(),
            elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
            "Published incremental index update"
        );
        Ok(version)
    }

    /// Write payloads stamped with a new version, then the metadata sidecar naming it.
    fn write_generation(
        &self,
        dim: usize,
        rows: &[(u64, Vec<f32>)],
        locations: HashMap<u64, SourceLocation>,
        text: Option<TextIndex>,
    ) -> Result<IndexVersion, CacheError> {
        std::fs::create_dir_all(&self.collection)?;
        let version = IndexVersion::generate();
        let has_text_index = text.is_some();

        write_vector_payload(&self.collection.join(VECTOR_FILE), &version, dim, self.params.space, rows)?;
        let table = IdTable {
            generation: version.clone(),
            locations,
        };
        save_compressed(&self.collection.join(ID_INDEX_FILE), &table, "id-index")?;
        let text_path = self.collection.join(TEXT_FILE);
        match text {
            Some(mut t) => {
                t.generation = Some(version.clone());
                t.save(&text_path)?;
            }
            None => {
                if text_path.exists() {
                    std::fs::remove_file(&text_path)?;
                }
            }
        }

        IndexMetadata {
            format_version: METADATA_FORMAT_VERSION,
            vector_dim: dim,
            space: self.params.space,
            vector_count: rows.len(),
            m: self.params.m,
            ef_construction: self.params.ef_construction,
            last_rebuild: now_secs(),
            index_rebuild_uuid: version.clone(),
            has_text_index,
        }
        .write_to(&self.collection)?;
        Ok(version)
    }

    fn uniform_dim(&self, records: &[IndexRecord], existing: Option<usize>) -> Result<usize, CacheError> {
        let dim = match (existing, records.first()) {
            (Some(d), _) => d,
            (None, Some(r)) => r.vector.len(),
            (None, None) => {
                return Err(CacheError::Publish {
                    path: self.collection.display().to_string(),
                    message: "no records to publish".to_string(),
                });
            }
        };
        if dim == 0 {
            return Err(CacheError::Publish {
                path: self.collection.display().to_string(),
                message: "vectors must not be empty".to_string(),
            });
        }
        if let Some(r) = records.iter().find(|r| r.vector.len() != dim) {
            return Err(CacheError::Publish {
                path: self.collection.display().to_string(),
                message: format!("record {} has dimension {}, expected {}", r.id, r.vector.len(), dim),
            });
        }
        Ok(dim)
    }
}

fn location_of(r: &IndexRecord) -> SourceLocation {
    SourceLocation {
        path: r.path.clone(),
        start_line: r.start_line,
        end_line: r.end_line,
    }
}
