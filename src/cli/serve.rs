//! Daemon startup and configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use cidx::config::normalize_project_path;
use cidx::{CacheError, DaemonCache};

use crate::daemon::handlers::HandlerContext;
use crate::daemon::server::run_server;
use crate::daemon::watcher::start_metadata_watcher;

use super::args::ServeArgs;
use super::init_logging;

pub fn cmd_serve(args: ServeArgs) -> Result<(), CacheError> {
    init_logging(&args.log_level);

    let config = args.cache_config();
    let project = normalize_project_path(Path::new(&args.project));
    let collection = config.collection_path_for(&project);
    info!(
        project = %project.display(),
        collection = %collection.display(),
        ttl_secs = config.ttl.as_secs(),
        poll_secs = config.poll_interval.as_secs(),
        staleness = ?config.staleness_policy,
        "Starting index daemon"
    );

    let cache = Arc::new(DaemonCache::new(config));
    cache.start();

    if args.preload {
        let start = Instant::now();
        match cache.ensure_loaded(&project) {
            Ok(outcome) => info!(
                outcome = ?outcome,
                elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
                "Index preloaded"
            ),
            // Not fatal: every query retries the load and reports the error itself
            Err(e) => warn!(error = %e, "Preload failed"),
        }
    }

    let _watcher = if args.watch {
        match start_metadata_watcher(Arc::clone(&cache), project.clone(), collection.clone(), args.debounce_ms) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(collection = %collection.display(), error = %e, "Failed to start metadata watcher, relying on per-query version checks");
                None
            }
        }
    } else {
        None
    };

    {
        let cache = Arc::clone(&cache);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Interrupted, releasing index handles");
            cache.shutdown();
            std::process::exit(130);
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    }

    let ctx = HandlerContext {
        cache: Arc::clone(&cache),
        project,
    };
    run_server(&ctx);

    cache.shutdown();
    let status = cache.status();
    info!(
        queries = status.counters.queries,
        loads = status.counters.loads,
        reloads = status.counters.reloads,
        evictions = status.counters.evictions,
        live_handles = status.live_handles,
        "Daemon stopped"
    );
    Ok(())
}
