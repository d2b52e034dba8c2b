use super::block::{Block, BlockId};
use super::collector::{self, GarbageCollector};
use super::table::{BlockTable, DefragReport};
use crate::config::RefCountPolicy;
use crate::dump::TableSnapshot;
use crate::error::{HeapError, Result};
use crate::observability::HeapMetrics;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub type SharedBlockTable = Arc<Mutex<BlockTable>>;

/// The block table behind its single lock, plus the collector that shares it.
///
/// Every operation is one short critical section; nothing here waits on I/O
/// while holding the lock.
pub struct MemoryManager {
    table: SharedBlockTable,
    collector: Mutex<Option<GarbageCollector>>,
    metrics: Arc<HeapMetrics>,
}

impl MemoryManager {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, RefCountPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: RefCountPolicy) -> Self {
        Self::with_metrics(capacity, policy, Arc::new(HeapMetrics::new()))
    }

    pub fn with_metrics(capacity: usize, policy: RefCountPolicy, metrics: Arc<HeapMetrics>) -> Self {
        Self {
            table: Arc::new(Mutex::new(BlockTable::with_policy(capacity, policy))),
            collector: Mutex::new(None),
            metrics,
        }
    }

    pub fn metrics(&self) -> Arc<HeapMetrics> {
        self.metrics.clone()
    }

    pub fn shared_table(&self) -> SharedBlockTable {
        self.table.clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BlockTable>> {
        self.table
            .lock()
            .map_err(|_| HeapError::InternalError("Failed to lock block table mutex".to_string()))
    }

    pub fn capacity(&self) -> Result<usize> {
        Ok(self.lock()?.capacity())
    }

    pub fn create(&self, size: usize, type_tag: &str) -> Result<BlockId> {
        let (result, defragmented) = {
            let mut table = self.lock()?;
            let before = table.defragmentation_count();
            let result = table.create(size, type_tag);
            (result, table.defragmentation_count() != before)
        };
        if defragmented {
            self.metrics.record_defragmentation();
        }
        if let Err(HeapError::Allocation { .. }) = result {
            self.metrics.record_allocation_failure();
        }
        result
    }

    pub fn set(&self, id: BlockId, bytes: &[u8]) -> Result<()> {
        self.lock()?.set(id, bytes)
    }

    pub fn get(&self, id: BlockId, max_len: usize) -> Result<Vec<u8>> {
        self.lock()?.get(id, max_len)
    }

    pub fn increase_ref_count(&self, id: BlockId) -> Result<i64> {
        self.lock()?.increase_ref_count(id)
    }

    pub fn decrease_ref_count(&self, id: BlockId) -> Result<i64> {
        self.lock()?.decrease_ref_count(id)
    }

    pub fn defragment(&self) -> Result<DefragReport> {
        let report = self.lock()?.defragment();
        self.metrics.record_defragmentation();
        Ok(report)
    }

    /// Runs one collector pass now, independent of the background thread.
    pub fn collect_now(&self) -> Result<Vec<BlockId>> {
        let reclaimed = collector::collect_once(&self.table)?;
        self.metrics.record_collection(reclaimed.len());
        Ok(reclaimed)
    }

    /// Copy of the entry for `id`, allocated or stale.
    pub fn block(&self, id: BlockId) -> Result<Option<Block>> {
        Ok(self.lock()?.block(id).cloned())
    }

    pub fn snapshot(&self) -> Result<TableSnapshot> {
        Ok(self.lock()?.snapshot())
    }

    /// Read-only access to the table under the lock.
    pub fn with_table<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BlockTable) -> R,
    {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Starts the background collector. No-op if it is already running.
    pub fn start_collector(&self, interval: Duration) -> Result<()> {
        let mut slot = self
            .collector
            .lock()
            .map_err(|_| HeapError::InternalError("Failed to lock collector slot".to_string()))?;
        if slot.as_ref().is_some_and(GarbageCollector::is_running) {
            return Ok(());
        }
        *slot = Some(GarbageCollector::start(
            self.table.clone(),
            interval,
            self.metrics.clone(),
        )?);
        Ok(())
    }

    /// Stops and joins the collector; returns once no pass is in flight.
    pub fn stop_collector(&self) {
        let collector = match self.collector.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut collector) = collector {
            collector.stop();
        }
    }

    pub fn is_collector_running(&self) -> bool {
        self.collector
            .lock()
            .map(|slot| slot.as_ref().is_some_and(GarbageCollector::is_running))
            .unwrap_or(false)
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.stop_collector();
    }
}
