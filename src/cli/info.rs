//! info command: published metadata and payload sizes for one collection.

use std::path::Path;

use serde_json::{json, Value};

use cidx::config::{ID_INDEX_FILE, METADATA_FILE, TEXT_FILE, VECTOR_FILE};
use cidx::{now_secs, CacheConfig, CacheError, IndexMetadataReader};

use super::args::InfoArgs;

pub fn cmd_info(args: InfoArgs) -> Result<(), CacheError> {
    let config = CacheConfig {
        collection: args.collection.clone(),
        ..CacheConfig::default()
    };
    let collection = config.collection_path_for(Path::new(&args.project));
    let info = info_json(&collection)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let meta = &info["metadata"];
    eprintln!("Collection: {}", collection.display());
    println!(
        "  version {} -- {} vectors, dim {}, space {}, M={}, ef_construction={}",
        meta["index_rebuild_uuid"].as_str().unwrap_or("?"),
        meta["vector_count"],
        meta["vector_dim"],
        meta["space"].as_str().unwrap_or("?"),
        meta["M"],
        meta["ef_construction"],
    );
    let age_hours = info["age_secs"].as_u64().unwrap_or(0) as f64 / 3600.0;
    println!("  last rebuild {:.1}h ago", age_hours);
    if let Some(files) = info["files"].as_object() {
        for (name, size) in files {
            match size.as_u64() {
                Some(bytes) => println!("  {:<22} {:.2} MB", name, bytes as f64 / 1_048_576.0),
                None => println!("  {:<22} (missing)", name),
            }
        }
    }
    Ok(())
}

/// Metadata plus on-disk sizes for a collection.
pub(crate) fn info_json(collection: &Path) -> Result<Value, CacheError> {
    let meta = IndexMetadataReader::read_metadata(collection)?;
    let age_secs = now_secs().saturating_sub(meta.last_rebuild);

    let mut files = serde_json::Map::new();
    for name in [VECTOR_FILE, ID_INDEX_FILE, TEXT_FILE, METADATA_FILE] {
        let size = std::fs::metadata(collection.join(name)).ok().map(|m| m.len());
        files.insert(name.to_string(), json!(size));
    }

    Ok(json!({
        "collection": collection.display().to_string(),
        "metadata": serde_json::to_value(&meta)?,
        "age_secs": age_secs,
        "files": files,
    }))
}
