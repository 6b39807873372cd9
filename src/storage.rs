//! File storage helpers: LZ4-compressed bincode payloads and atomic replacement.
//!
//! Every write goes to a temporary file in the destination directory, is
//! fsynced, and is then renamed over the final name. Readers holding the old
//! file (or a mapping of it) keep seeing the old inode.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::CacheError;

/// Magic bytes identifying LZ4-compressed payload files.
pub const LZ4_MAGIC: &[u8; 4] = b"LZ4S";

/// Write a file atomically: `fill` writes the content into a temp file next to
/// `path`, which is then synced and renamed into place.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<(), CacheError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), CacheError>,
{
    let dir = path.parent().ok_or_else(|| CacheError::Publish {
        path: path.display().to_string(),
        message: "path has no parent directory".to_string(),
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        fill(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CacheError::Publish {
        path: path.display().to_string(),
        message: format!("rename failed: {}", e.error),
    })?;
    sync_parent_dir(dir);
    Ok(())
}

/// Make the rename itself durable. Not supported everywhere, so best-effort.
fn sync_parent_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Save a serializable value with LZ4 frame compression, atomically.
/// Writes magic bytes, then LZ4-compressed bincode data.
pub fn save_compressed<T: serde::Serialize>(path: &Path, data: &T, label: &str) -> Result<(), CacheError> {
    let start = Instant::now();

    write_atomic(path, |writer| {
        writer.write_all(LZ4_MAGIC)?;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
        bincode::serialize_into(&mut encoder, data)?;
        encoder
            .finish()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    })?;

    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    debug!(
        label,
        path = %path.display(),
        bytes = size,
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        "Saved compressed payload"
    );
    Ok(())
}

/// Load a value saved by [`save_compressed`], also accepting legacy
/// uncompressed bincode. Failures are reported as [`CacheError::Open`].
pub fn load_compressed<T: serde::de::DeserializeOwned>(path: &Path, label: &str) -> Result<T, CacheError> {
    let start = Instant::now();

    let file = File::open(path).map_err(|e| CacheError::open(path, format!("cannot open file: {}", e)))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| CacheError::open(path, format!("read error (magic bytes): {}", e)))?;

    let result = if &magic == LZ4_MAGIC {
        let decoder = lz4_flex::frame::FrameDecoder::new(reader);
        bincode::deserialize_from(decoder)
            .map_err(|e| CacheError::open(path, format!("LZ4 deserialization failed: {}", e)))?
    } else {
        // Legacy uncompressed format
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| CacheError::open(path, format!("seek error: {}", e)))?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| CacheError::open(path, format!("read error: {}", e)))?;
        bincode::deserialize(&buf)
            .map_err(|e| CacheError::open(path, format!("deserialization failed: {}", e)))?
    };

    debug!(
        label,
        path = %path.display(),
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        "Loaded compressed payload"
    );
    Ok(result)
}

/// Serialize `value` as pretty JSON and replace `path` atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    write_atomic(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, value)?;
        writer.write_all(b"\n")?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_compressed_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("table.bin");
        let mut table: HashMap<u64, String> = HashMap::new();
        table.insert(7, "src/main.rs".to_string());
        save_compressed(&path, &table, "test").unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..4], LZ4_MAGIC);

        let loaded: HashMap<u64, String> = load_compressed(&path, "test").unwrap();
        assert_eq!(loaded.get(&7).map(String::as_str), Some("src/main.rs"));
    }

    #[test]
    fn test_load_legacy_uncompressed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("legacy.bin");
        let value: Vec<u32> = vec![1, 2, 3];
        std::fs::write(&path, bincode::serialize(&value).unwrap()).unwrap();
        let loaded: Vec<u32> = load_compressed(&path, "legacy").unwrap();
        assert_eq!(loaded, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_missing_file_is_open_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_compressed::<Vec<u32>>(&tmp.path().join("nope.bin"), "x").unwrap_err();
        assert!(matches!(err, CacheError::Open { .. }));
        assert!(err.to_string().contains("cannot open file"));
    }

    #[test]
    fn test_load_truncated_file_is_open_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("short.bin");
        std::fs::write(&path, b"LZ").unwrap();
        let err = load_compressed::<Vec<u32>>(&path, "x").unwrap_err();
        assert!(err.to_string().contains("magic bytes"));
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["v"], 2);

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1, "temp files left behind: {:?}", names);
    }

    #[test]
    fn test_failed_fill_keeps_previous_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keep.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();

        let result = write_atomic(&path, |w| {
            w.write_all(b"{ partial")?;
            Err(CacheError::InvalidArgs("boom".to_string()))
        });
        assert!(result.is_err());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"v\": 1"));
    }
}
