//! Memory-mapped semantic payload.
//!
//! Layout (little endian):
//!
//! ```text
//! magic "CIDXVEC2" | u32 dim | u32 space | u64 count | u32 stamp_len | stamp
//!     | count × u64 id | count × dim × f32
//! ```
//!
//! `stamp` is the UTF-8 [`IndexVersion`] of the generation the payload was
//! written for, so a reader can tell which generation a mapping belongs to.
//!
//! Similarity is a flat scan over the mapping; the vectors themselves come
//! from the embedding provider and are opaque here.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::config::VECTOR_FILE;
use crate::error::CacheError;
use crate::handle::{IndexPayload, OpenOptions};
use crate::metadata::{IndexVersion, Space};
use crate::storage::write_atomic;

pub const VECTOR_MAGIC: &[u8; 8] = b"CIDXVEC2";
/// Header bytes before the variable-length generation stamp.
const FIXED_HEADER_LEN: usize = 28;

/// Read-only view of a published semantic payload.
pub struct VectorIndex {
    mmap: Mmap,
    dim: usize,
    count: usize,
    space: Space,
    generation: IndexVersion,
    /// Offset of the id table (end of the header).
    data_offset: usize,
}

impl VectorIndex {
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn space(&self) -> Space {
        self.space
    }

    /// Generation stamped into the payload header.
    pub fn generation(&self) -> &IndexVersion {
        &self.generation
    }

    /// Id stored at row `i`.
    pub fn id_at(&self, i: usize) -> u64 {
        let off = self.data_offset + i * 8;
        read_u64(&self.mmap[off..off + 8])
    }

    /// Vector stored at row `i`.
    pub fn vector_at(&self, i: usize) -> Vec<f32> {
        self.row_bytes(i)
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Row holding `id`, if any.
    pub fn position_of(&self, id: u64) -> Option<usize> {
        (0..self.count).find(|&i| self.id_at(i) == id)
    }

    /// All `(id, vector)` rows, in file order.
    pub fn rows(&self) -> Vec<(u64, Vec<f32>)> {
        (0..self.count).map(|i| (self.id_at(i), self.vector_at(i))).collect()
    }

    /// Top-`limit` rows by similarity to `query` (higher score is closer).
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(u64, f32)>, CacheError> {
        if query.len() != self.dim {
            return Err(CacheError::InvalidQuery(format!(
                "query vector has dimension {}, index has {}",
                query.len(),
                self.dim
            )));
        }
        let query_norm = norm(query.iter().copied());

        let mut scored: Vec<(u64, f32)> = (0..self.count)
            .map(|i| {
                let row = self.row_bytes(i).chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                (self.id_at(i), score(self.space, query, query_norm, row))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if limit > 0 {
            scored.truncate(limit);
        }
        Ok(scored)
    }

    fn row_bytes(&self, i: usize) -> &[u8] {
        let start = self.data_offset + self.count * 8 + i * self.dim * 4;
        &self.mmap[start..start + self.dim * 4]
    }
}

impl IndexPayload for VectorIndex {
    const KIND: &'static str = "semantic";
    const FILE_NAME: &'static str = VECTOR_FILE;

    fn open_at(path: &Path, options: &OpenOptions) -> Result<Self, CacheError> {
        let file = File::open(path).map_err(|e| CacheError::open(path, format!("cannot open file: {}", e)))?;
        let file_len = file
            .metadata()
            .map_err(|e| CacheError::open(path, format!("cannot stat file: {}", e)))?
            .len() as usize;
        if file_len < FIXED_HEADER_LEN {
            return Err(CacheError::open(path, format!("file too short ({} bytes)", file_len)));
        }

        // SAFETY: payloads are only ever replaced by renaming a new file over
        // the old name, never truncated or rewritten in place, so the mapped
        // inode stays intact for the lifetime of the mapping.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| CacheError::open(path, format!("mmap failed: {}", e)))?;

        if &mmap[..8] != VECTOR_MAGIC {
            return Err(CacheError::open(path, "bad magic (not a vector payload)"));
        }
        let dim = read_u32(&mmap[8..12]) as usize;
        let space_code = read_u32(&mmap[12..16]);
        let count = read_u64(&mmap[16..24]) as usize;
        let stamp_len = read_u32(&mmap[24..28]) as usize;

        let space = Space::from_code(space_code)
            .ok_or_else(|| CacheError::open(path, format!("unknown space code {}", space_code)))?;
        if dim == 0 {
            return Err(CacheError::open(path, "zero dimension"));
        }
        if let Some(expected) = options.expected_dim {
            if expected != dim {
                return Err(CacheError::open(
                    path,
                    format!("dimension mismatch: payload has {}, expected {}", dim, expected),
                ));
            }
        }
        let data_offset = FIXED_HEADER_LEN + stamp_len;
        if stamp_len == 0 || data_offset > file_len {
            return Err(CacheError::open(path, format!("bad generation stamp length {}", stamp_len)));
        }
        let generation = std::str::from_utf8(&mmap[FIXED_HEADER_LEN..data_offset])
            .map_err(|e| CacheError::open(path, format!("generation stamp is not UTF-8: {}", e)))?;
        let generation = IndexVersion::from(generation);

        let expected_len = count
            .checked_mul(8 + dim * 4)
            .and_then(|body| body.checked_add(data_offset));
        if expected_len != Some(file_len) {
            return Err(CacheError::open(
                path,
                format!("length mismatch: {} bytes for {} vectors of dim {}", file_len, count, dim),
            ));
        }

        Ok(VectorIndex {
            mmap,
            dim,
            count,
            space,
            generation,
            data_offset,
        })
    }

    fn generation(&self) -> Option<&IndexVersion> {
        Some(&self.generation)
    }
}

/// Write a semantic payload for `generation` to `path` atomically.
pub fn write_vector_payload(
    path: &Path,
    generation: &IndexVersion,
    dim: usize,
    space: Space,
    rows: &[(u64, Vec<f32>)],
) -> Result<(), CacheError> {
    if let Some((id, v)) = rows.iter().find(|(_, v)| v.len() != dim) {
        return Err(CacheError::Publish {
            path: path.display().to_string(),
            message: format!("vector for id {} has dimension {}, expected {}", id, v.len(), dim),
        });
    }
    write_atomic(path, |w| {
        w.write_all(VECTOR_MAGIC)?;
        w.write_all(&(dim as u32).to_le_bytes())?;
        w.write_all(&space.code().to_le_bytes())?;
        w.write_all(&(rows.len() as u64).to_le_bytes())?;
        w.write_all(&(generation.as_str().len() as u32).to_le_bytes())?;
        w.write_all(generation.as_str().as_bytes())?;
        for (id, _) in rows {
            w.write_all(&id.to_le_bytes())?;
        }
        for (_, v) in rows {
            for x in v {
                w.write_all(&x.to_le_bytes())?;
            }
        }
        Ok(())
    })
}

// ─── Scoring ────────────────────────────────────────────────────────

fn score(space: Space, query: &[f32], query_norm: f32, row: impl Iterator<Item = f32> + Clone) -> f32 {
    match space {
        Space::Ip => dot(query, row),
        Space::L2 => {
            let dist: f32 = query.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum();
            -dist
        }
        Space::Cosine => {
            let row_norm = norm(row.clone());
            if query_norm == 0.0 || row_norm == 0.0 {
                0.0
            } else {
                dot(query, row) / (query_norm * row_norm)
            }
        }
    }
}

fn dot(a: &[f32], b: impl Iterator<Item = f32>) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: impl Iterator<Item = f32>) -> f32 {
    v.map(|x| x * x).sum::<f32>().sqrt()
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rows: &[(u64, Vec<f32>)], space: Space) -> std::path::PathBuf {
        let path = dir.join(VECTOR_FILE);
        let dim = rows.first().map(|r| r.1.len()).unwrap_or(3);
        write_vector_payload(&path, &IndexVersion::from("gen-1"), dim, space, rows).unwrap();
        path
    }

    #[test]
    fn test_open_and_read_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), &[(10, vec![1.0, 0.0, 0.0]), (20, vec![0.0, 1.0, 0.0])], Space::Cosine);
        let idx = VectorIndex::open_at(&path, &OpenOptions::default()).unwrap();
        assert_eq!(idx.dim(), 3);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.id_at(1), 20);
        assert_eq!(idx.vector_at(1), vec![0.0, 1.0, 0.0]);
        assert_eq!(idx.position_of(20), Some(1));
        assert_eq!(idx.position_of(99), None);
        assert_eq!(idx.generation().as_str(), "gen-1");
    }

    #[test]
    fn test_cosine_search_ranks_nearest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(
            tmp.path(),
            &[(1, vec![1.0, 0.0, 0.0]), (2, vec![0.7, 0.7, 0.0]), (3, vec![0.0, 0.0, 1.0])],
            Space::Cosine,
        );
        let idx = VectorIndex::open_at(&path, &OpenOptions::default()).unwrap();
        let hits = idx.search(&[0.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 2);
    }

    #[test]
    fn test_l2_search() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), &[(1, vec![0.0, 0.0]), (2, vec![5.0, 5.0])], Space::L2);
        let idx = VectorIndex::open_at(&path, &OpenOptions::default()).unwrap();
        let hits = idx.search(&[4.0, 4.0], 0).unwrap();
        assert_eq!(hits[0].0, 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_search_wrong_dimension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), &[(1, vec![1.0, 0.0])], Space::Cosine);
        let idx = VectorIndex::open_at(&path, &OpenOptions::default()).unwrap();
        assert!(matches!(idx.search(&[1.0], 1), Err(CacheError::InvalidQuery(_))));
    }

    #[test]
    fn test_expected_dim_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), &[(1, vec![1.0, 0.0])], Space::Cosine);
        let err = VectorIndex::open_at(&path, &OpenOptions { expected_dim: Some(768) }).err().unwrap();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_corrupt_payloads_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(VECTOR_FILE);

        std::fs::write(&path, b"short").unwrap();
        assert!(VectorIndex::open_at(&path, &OpenOptions::default()).is_err());

        std::fs::write(&path, [0u8; 32]).unwrap();
        let err = VectorIndex::open_at(&path, &OpenOptions::default()).err().unwrap();
        assert!(err.to_string().contains("bad magic"));

        write(tmp.path(), &[(1, vec![1.0, 2.0])], Space::Cosine);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.pop();
        std::fs::write(&path, &bytes).unwrap();
        let err = VectorIndex::open_at(&path, &OpenOptions::default()).err().unwrap();
        assert!(err.to_string().contains("length mismatch"));

        let mut header = VECTOR_MAGIC.to_vec();
        header.extend_from_slice(&2u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, &header).unwrap();
        let err = VectorIndex::open_at(&path, &OpenOptions::default()).err().unwrap();
        assert!(err.to_string().contains("generation stamp"), "unstamped payload rejected: {}", err);
    }

    #[test]
    fn test_write_rejects_ragged_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(VECTOR_FILE);
        let err = write_vector_payload(&path, &IndexVersion::from("g"), 2, Space::Cosine, &[(1, vec![1.0, 2.0]), (2, vec![1.0])]).unwrap_err();
        assert!(matches!(err, CacheError::Publish { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_payload_opens() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(VECTOR_FILE);
        write_vector_payload(&path, &IndexVersion::from("g"), 4, Space::Ip, &[]).unwrap();
        let idx = VectorIndex::open_at(&path, &OpenOptions::default()).unwrap();
        assert!(idx.is_empty());
        assert!(idx.search(&[0.0; 4], 5).unwrap().is_empty());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every row written is read back bit-exact at the same position.
        #[test]
        fn rows_survive_payload_format(
            dim in 1usize..16,
            ids in proptest::collection::vec(any::<u64>(), 0..20),
        ) {
            let rows: Vec<(u64, Vec<f32>)> = ids.iter().enumerate()
                .map(|(i, &id)| (id, (0..dim).map(|d| (i * dim + d) as f32 * 0.5).collect()))
                .collect();
            let tmp = tempfile::tempdir().unwrap();
            let path = tmp.path().join(VECTOR_FILE);
            write_vector_payload(&path, &IndexVersion::generate(), dim, Space::Cosine, &rows).unwrap();
            let idx = VectorIndex::open_at(&path, &OpenOptions::default()).unwrap();
            prop_assert_eq!(idx.rows(), rows);
        }
    }
}
