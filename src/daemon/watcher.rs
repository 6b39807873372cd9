use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use cidx::config::METADATA_FILE;
use cidx::DaemonCache;

/// Keeps the metadata watcher alive. Dropping it stops the watcher thread.
pub struct MetadataWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `project`'s collection metadata sidecar and invalidate the cache
/// entry for that project when a new generation is published.
///
/// Queries already detect new versions on their own. The watcher releases
/// the previous generation's mappings right away instead of at the next
/// query, so replaced payload files do not stay pinned while the daemon is idle.
/// An entry switched to another project through a query override is untouched.
pub fn start_metadata_watcher(
    cache: Arc<DaemonCache>,
    project: PathBuf,
    collection: PathBuf,
    debounce_ms: u64,
) -> notify::Result<MetadataWatcher> {
    let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();

    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    watcher.watch(&collection, RecursiveMode::NonRecursive)?;

    info!(collection = %collection.display(), debounce_ms, "Metadata watcher started");

    std::thread::spawn(move || {
        let mut pending = false;
        loop {
            match rx.recv_timeout(Duration::from_millis(debounce_ms)) {
                Ok(Ok(event)) => {
                    if touches_metadata(&event) {
                        debug!(kind = ?event.kind, "Metadata sidecar changed");
                        pending = true;
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Metadata watcher error");
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Debounce window expired: a publish writes several files, act once
                    if pending {
                        pending = false;
                        if cache.invalidate_project(&project) {
                            info!(collection = %collection.display(), "New index generation published, released cached handles");
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Metadata watcher channel disconnected, stopping");
                    break;
                }
            }
        }
    });

    Ok(MetadataWatcher { _watcher: watcher })
}

/// Whether `event` created, replaced or removed the metadata sidecar.
fn touches_metadata(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| is_metadata_file(p))
}

fn is_metadata_file(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == METADATA_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind, RenameMode};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_metadata_rename_is_detected() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            "/p/.code-indexer/index/code_index/collection_meta.json",
        );
        assert!(touches_metadata(&e));
    }

    #[test]
    fn test_metadata_create_and_remove() {
        assert!(touches_metadata(&event(EventKind::Create(CreateKind::File), "/c/collection_meta.json")));
        assert!(touches_metadata(&event(EventKind::Remove(RemoveKind::File), "/c/collection_meta.json")));
    }

    #[test]
    fn test_payload_and_temp_files_ignored() {
        assert!(!touches_metadata(&event(EventKind::Create(CreateKind::File), "/c/hnsw_index.bin")));
        assert!(!touches_metadata(&event(EventKind::Modify(ModifyKind::Any), "/c/.tmpA1b2C3")));
    }

    #[test]
    fn test_access_ignored() {
        assert!(!touches_metadata(&event(EventKind::Access(AccessKind::Any), "/c/collection_meta.json")));
    }

    #[test]
    fn test_missing_collection_fails_to_start() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DaemonCache::new(cidx::CacheConfig::default()));
        let result = start_metadata_watcher(cache, tmp.path().to_path_buf(), tmp.path().join("absent"), 50);
        assert!(result.is_err());
    }
}
