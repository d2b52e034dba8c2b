use super::block::BlockId;
use super::manager::SharedBlockTable;
use crate::error::{HeapError, Result};
use crate::observability::{HeapMetrics, StructuredLogger};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Background thread that periodically reclaims blocks whose reference count
/// dropped to zero or below.
///
/// Each cycle takes the table lock, marks collectable entries free and zeroes
/// their bytes, releases the lock, then waits `interval` or until stopped.
/// [`stop`](Self::stop) blocks until the in-flight cycle has finished.
pub struct GarbageCollector {
    stop_tx: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
    interval: Duration,
}

impl GarbageCollector {
    pub fn start(
        table: SharedBlockTable,
        interval: Duration,
        metrics: Arc<HeapMetrics>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let logger = StructuredLogger::default();

        let join = std::thread::Builder::new()
            .name("heap-collector".to_string())
            .spawn(move || run_collector(table, interval, stop_rx, metrics, logger))
            .map_err(|e| {
                HeapError::InternalError(format!("Failed to spawn collector thread: {}", e))
            })?;

        log::info!("Collector started (interval={:?})", interval);
        Ok(Self {
            stop_tx: Some(stop_tx),
            join: Some(join),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Signals the thread and joins it. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Collector thread panicked");
            } else {
                log::info!("Collector stopped");
            }
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a single collection pass under the table lock.
pub fn collect_once(table: &SharedBlockTable) -> Result<Vec<BlockId>> {
    let mut guard = table
        .lock()
        .map_err(|_| HeapError::InternalError("Failed to lock block table mutex".to_string()))?;
    Ok(guard.collect_garbage())
}

fn run_collector(
    table: SharedBlockTable,
    interval: Duration,
    stop_rx: mpsc::Receiver<()>,
    metrics: Arc<HeapMetrics>,
    logger: StructuredLogger,
) {
    loop {
        match collect_once(&table) {
            Ok(reclaimed) => {
                metrics.record_collection(reclaimed.len());
                logger.log_collection(&reclaimed);
            }
            Err(e) => {
                log::error!("Collector exiting: {}", e);
                return;
            }
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
