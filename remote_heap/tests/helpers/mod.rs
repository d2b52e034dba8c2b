//! Shared setup for integration tests: an in-process server on an ephemeral
//! port with a short collector interval.

#![allow(dead_code)]

use remote_heap::dump::TableSnapshot;
use remote_heap::{
    BlockId, Connection, NoopSink, RefCountPolicy, ServerConfig, ServerHandle, SnapshotSink,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const GC_INTERVAL_MS: u64 = 50;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config(capacity: usize) -> ServerConfig {
    ServerConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        arena_size_bytes: Some(capacity),
        dump_folder: None,
        gc_interval_ms: GC_INTERVAL_MS,
        ..ServerConfig::default()
    }
}

pub fn start_server(capacity: usize) -> ServerHandle {
    start_server_with(test_config(capacity), Arc::new(NoopSink))
}

pub fn start_server_with(config: ServerConfig, sink: Arc<dyn SnapshotSink>) -> ServerHandle {
    init_logging();
    ServerHandle::start(&config, sink).expect("start test server")
}

pub fn start_server_with_policy(capacity: usize, policy: RefCountPolicy) -> ServerHandle {
    let config = ServerConfig {
        ref_count_policy: policy,
        ..test_config(capacity)
    };
    start_server_with(config, Arc::new(NoopSink))
}

pub fn connect(server: &ServerHandle) -> Arc<Connection> {
    Connection::open(server.local_addr().to_string()).expect("connect to test server")
}

/// Current counter of `id` as the server sees it; `None` once the entry is
/// gone or no longer allocated.
pub fn ref_count(server: &ServerHandle, id: BlockId) -> Option<i64> {
    server
        .manager()
        .block(id)
        .expect("lock table")
        .filter(|b| b.allocated)
        .map(|b| b.ref_count)
}

/// Long enough for at least one full collector pass.
pub fn collector_cycle() -> Duration {
    Duration::from_millis(GC_INTERVAL_MS * 3)
}

pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Sink that keeps every event with the `(id, ref_count)` of each allocated
/// block at that moment.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Vec<(BlockId, i64)>)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, Vec<(BlockId, i64)>)> {
        self.events.lock().expect("sink lock").clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }
}

impl SnapshotSink for RecordingSink {
    fn record(&self, event: &str, snapshot: &TableSnapshot) {
        let counts = snapshot
            .blocks
            .iter()
            .filter(|b| b.allocated)
            .map(|b| (b.id, b.ref_count))
            .collect();
        self.events
            .lock()
            .expect("sink lock")
            .push((event.to_string(), counts));
    }
}
