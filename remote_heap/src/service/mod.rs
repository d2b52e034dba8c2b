use crate::dump::SnapshotSink;
use crate::engine::{BlockId, MemoryManager, NULL_BLOCK_ID};
use crate::error::{HeapError, Result};
use crate::observability::{HeapMetrics, StructuredLogger};
use crate::protocol::{OpCode, Request, Response};
use log::Level;
use std::sync::Arc;
use std::time::Instant;

/// Translates decoded requests into table operations.
///
/// Holds no state of its own beyond shared references; every call locks the
/// table once. After `Create`, `Set` and `DecreaseRefCount` the snapshot sink
/// is notified whether or not the operation succeeded. The snapshot is taken
/// under the table lock and the sink runs after it is released.
pub struct MemoryService {
    manager: Arc<MemoryManager>,
    sink: Arc<dyn SnapshotSink>,
    metrics: Arc<HeapMetrics>,
    logger: StructuredLogger,
    max_read_len: usize,
}

impl MemoryService {
    pub fn new(manager: Arc<MemoryManager>, sink: Arc<dyn SnapshotSink>, max_read_len: usize) -> Self {
        let metrics = manager.metrics();
        Self {
            manager,
            sink,
            metrics,
            logger: StructuredLogger::default(),
            max_read_len,
        }
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    pub fn metrics(&self) -> &Arc<HeapMetrics> {
        &self.metrics
    }

    pub fn max_read_len(&self) -> usize {
        self.max_read_len
    }

    pub fn handle(&self, request: Request) -> Response {
        let op = request.op_code();
        let target = request.target();
        let started = Instant::now();

        let result = match request {
            Request::Create { size, type_tag } => {
                self.create(size, &type_tag).map(Response::created)
            }
            Request::Set { id, value } => self.set(id, &value).map(|_| Response::ok(op)),
            Request::Get { id } => self.get(id).map(Response::with_value),
            Request::IncreaseRefCount { id } => {
                self.increase_ref_count(id).map(|_| Response::ok(op))
            }
            Request::DecreaseRefCount { id } => {
                self.decrease_ref_count(id).map(|_| Response::ok(op))
            }
        };

        // Clients check liveness with a request on the null id; its
        // rejection is expected and stays out of the warnings and metrics.
        let liveness_check = target == Some(NULL_BLOCK_ID);
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let mut metadata = vec![("error", e.to_string())];
                if let Some(id) = target {
                    metadata.push(("id", id.to_string()));
                }
                let level = if liveness_check { Level::Debug } else { Level::Warn };
                self.logger.log_operation(level, op.name(), &metadata);
                Response::failure(op, &e)
            }
        };

        if !(liveness_check && !response.success) {
            self.metrics
                .record_operation(op, started.elapsed(), response.success);
        }

        if op.is_mutating() {
            self.notify(op);
        }
        response
    }

    pub fn create(&self, size: u64, type_tag: &str) -> Result<BlockId> {
        let size = usize::try_from(size).map_err(|_| HeapError::Allocation { size: usize::MAX })?;
        let id = self.manager.create(size, type_tag)?;
        self.logger.log_operation(
            Level::Debug,
            "Create",
            &[
                ("id", id.to_string()),
                ("size", size.to_string()),
                ("type", type_tag.to_string()),
            ],
        );
        Ok(id)
    }

    pub fn set(&self, id: BlockId, value: &[u8]) -> Result<()> {
        self.manager.set(id, value)?;
        self.logger.log_operation(
            Level::Debug,
            "Set",
            &[("id", id.to_string()), ("len", value.len().to_string())],
        );
        Ok(())
    }

    /// Reads at most `max_read_len` bytes of the block.
    pub fn get(&self, id: BlockId) -> Result<Vec<u8>> {
        let value = self.manager.get(id, self.max_read_len)?;
        self.logger.log_operation(
            Level::Debug,
            "Get",
            &[("id", id.to_string()), ("len", value.len().to_string())],
        );
        Ok(value)
    }

    pub fn increase_ref_count(&self, id: BlockId) -> Result<i64> {
        let count = self.manager.increase_ref_count(id)?;
        self.logger.log_operation(
            Level::Debug,
            "IncreaseRefCount",
            &[("id", id.to_string()), ("ref_count", count.to_string())],
        );
        Ok(count)
    }

    pub fn decrease_ref_count(&self, id: BlockId) -> Result<i64> {
        let count = self.manager.decrease_ref_count(id)?;
        self.logger.log_operation(
            Level::Debug,
            "DecreaseRefCount",
            &[("id", id.to_string()), ("ref_count", count.to_string())],
        );
        Ok(count)
    }

    fn notify(&self, op: OpCode) {
        if !self.sink.is_enabled() {
            return;
        }
        match self.manager.snapshot() {
            Ok(snapshot) => self.sink.record(op.name(), &snapshot),
            Err(e) => log::error!("Snapshot after {} failed: {}", op.name(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{NoopSink, TableSnapshot};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, usize)>>,
    }

    impl SnapshotSink for RecordingSink {
        fn record(&self, event: &str, snapshot: &TableSnapshot) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), snapshot.allocated_count()));
        }
    }

    fn service_with_sink(capacity: usize, sink: Arc<dyn SnapshotSink>) -> MemoryService {
        MemoryService::new(Arc::new(MemoryManager::new(capacity)), sink, 1024 * 1024)
    }

    #[test]
    fn test_handle_scenario() {
        let service = service_with_sink(1024, Arc::new(NoopSink));

        let created = service.handle(Request::Create {
            size: 4,
            type_tag: "int".to_string(),
        });
        assert!(created.success);
        assert_eq!(created.id, 1);

        let set = service.handle(Request::Set {
            id: 1,
            value: vec![42, 0, 0, 0],
        });
        assert!(set.success);

        let get = service.handle(Request::Get { id: 1 });
        assert_eq!(get.value, vec![42, 0, 0, 0]);

        assert!(service.handle(Request::DecreaseRefCount { id: 1 }).success);
        service.manager().collect_now().expect("collect");

        let get = service.handle(Request::Get { id: 1 });
        assert!(!get.success);
        assert_eq!(get.into_result(), Err(HeapError::InvalidHandle(1)));
    }

    #[test]
    fn test_failed_create_reports_null_id() {
        let service = service_with_sink(8, Arc::new(NoopSink));
        let response = service.handle(Request::Create {
            size: 16,
            type_tag: "big".to_string(),
        });
        assert!(!response.success);
        assert_eq!(response.id, -1);
        assert_eq!(
            response.into_result(),
            Err(HeapError::Allocation { size: 16 })
        );
    }

    #[test]
    fn test_failed_create_keeps_requested_size_on_the_wire() {
        let service = service_with_sink(8, Arc::new(NoopSink));
        let size = 1u64 << 40;
        let response = service.handle(Request::Create {
            size,
            type_tag: "huge".to_string(),
        });
        let encoded = crate::protocol::ResponseEncoder::encode(&response);
        let decoded = crate::protocol::ResponseDecoder::decode(&encoded).expect("decode");
        assert_eq!(
            decoded.into_result(),
            Err(HeapError::Allocation {
                size: usize::try_from(size).unwrap_or(usize::MAX)
            })
        );
    }

    #[test]
    fn test_set_larger_than_block_is_bounds_error() {
        let service = service_with_sink(64, Arc::new(NoopSink));
        let id = service.create(2, "u16").expect("create");
        let response = service.handle(Request::Set {
            id,
            value: vec![1, 2, 3],
        });
        assert!(matches!(response.into_result(), Err(HeapError::Bounds(_))));
    }

    #[test]
    fn test_get_capped_by_max_read_len() {
        let manager = Arc::new(MemoryManager::new(64));
        let service = MemoryService::new(manager, Arc::new(NoopSink), 3);
        let id = service.create(8, "u64").expect("create");
        service.set(id, &[1, 2, 3, 4, 5, 6, 7, 8]).expect("set");
        assert_eq!(service.get(id).expect("get"), vec![1, 2, 3]);
        assert_eq!(service.max_read_len(), 3);
    }

    #[test]
    fn test_sink_notified_after_mutations_even_on_failure() {
        let sink = Arc::new(RecordingSink::default());
        let service = service_with_sink(64, sink.clone());

        service.handle(Request::Create {
            size: 4,
            type_tag: "int".to_string(),
        });
        service.handle(Request::Get { id: 1 });
        service.handle(Request::IncreaseRefCount { id: 1 });
        service.handle(Request::Set {
            id: 99,
            value: vec![0],
        });
        service.handle(Request::DecreaseRefCount { id: 1 });

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("Create".to_string(), 1),
                ("Set".to_string(), 1),
                ("DecreaseRefCount".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_metrics_recorded_per_operation() {
        let service = service_with_sink(64, Arc::new(NoopSink));
        service.handle(Request::Get { id: 5 });
        service.handle(Request::Create {
            size: 1,
            type_tag: "u8".to_string(),
        });

        let get = service
            .metrics()
            .get_operation_metrics(OpCode::Get)
            .expect("get metrics");
        assert_eq!(get.count, 1);
        assert_eq!(get.failures, 1);
        assert_eq!(service.metrics().get_error_count(), 1);
    }

    #[test]
    fn test_increase_on_null_id_fails_without_counting_an_error() {
        let service = service_with_sink(64, Arc::new(NoopSink));
        let response = service.handle(Request::IncreaseRefCount { id: NULL_BLOCK_ID });
        assert_eq!(
            response.into_result(),
            Err(HeapError::InvalidHandle(NULL_BLOCK_ID))
        );
        assert_eq!(service.metrics().get_error_count(), 0);
        assert!(service
            .metrics()
            .get_operation_metrics(OpCode::IncreaseRefCount)
            .is_none());

        service.handle(Request::IncreaseRefCount { id: 7 });
        assert_eq!(service.metrics().get_error_count(), 1);
    }
}
