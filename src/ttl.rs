//! Background eviction of an idle cache entry.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordinator::{evict_idle, CacheState};

/// Periodic thread that evicts the coordinator's entry once it has been idle
/// for longer than the TTL. Ticks take the same mutex as queries, so an entry
/// is never evicted while a query is using it.
///
/// `Default` is a loop that was never started; [`stop`](Self::stop) is a no-op on it.
#[derive(Debug, Default)]
pub struct TtlEvictionLoop {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TtlEvictionLoop {
    /// Start the eviction thread over `state`.
    pub(crate) fn spawn(state: Arc<Mutex<CacheState>>, ttl: Duration, poll_interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = std::thread::Builder::new()
            .name("cidx-ttl".to_string())
            .spawn(move || {
                debug!(ttl_secs = ttl.as_secs(), poll_ms = poll_interval.as_millis() as u64, "TTL eviction loop started");
                loop {
                    match stop_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            evict_idle(&state, ttl);
                        }
                        // Stop signal, or the owner went away without calling stop()
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("TTL eviction loop exited");
            });

        match spawned {
            Ok(thread) => {
                info!(ttl_secs = ttl.as_secs(), poll_secs = poll_interval.as_secs(), "TTL eviction enabled");
                Self {
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to spawn TTL eviction thread, idle entries will not be evicted");
                Self::default()
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("TTL eviction thread panicked");
            }
        }
    }
}

impl Drop for TtlEvictionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
