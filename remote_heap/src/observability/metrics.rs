use crate::observability::logging::StructuredLogger;
use crate::protocol::OpCode;
use log::Level;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub failures: u64,
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub latency_samples: VecDeque<Duration>,
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            failures: 0,
            total_latency: Duration::ZERO,
            min_latency: Duration::MAX,
            max_latency: Duration::ZERO,
            latency_samples: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
        }
    }

    pub fn record(&mut self, latency: Duration, success: bool) {
        self.count += 1;
        if !success {
            self.failures += 1;
        }
        self.total_latency += latency;

        if latency < self.min_latency {
            self.min_latency = latency;
        }
        if latency > self.max_latency {
            self.max_latency = latency;
        }

        if self.latency_samples.len() == MAX_LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency);
    }

    pub fn average_latency(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_latency.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn percentile(&self, p: f64) -> Duration {
        if self.latency_samples.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted: Vec<Duration> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let index = ((sorted.len() - 1) as f64 * p / 100.0) as usize;
        sorted[index]
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Duration {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

/// Counters shared by the service, the manager and the collector.
pub struct HeapMetrics {
    operations: Mutex<HashMap<OpCode, OperationMetrics>>,
    error_count: AtomicU64,
    allocation_failures: AtomicU64,
    reclaimed_blocks: AtomicU64,
    collector_cycles: AtomicU64,
    defragmentations: AtomicU64,
    start_time: Instant,
}

impl HeapMetrics {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            error_count: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            reclaimed_blocks: AtomicU64::new(0),
            collector_cycles: AtomicU64::new(0),
            defragmentations: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_operation(&self, op: OpCode, latency: Duration, success: bool) {
        if let Ok(mut operations) = self.operations.lock() {
            operations.entry(op).or_default().record(latency, success);
        }
        if !success {
            self.record_error();
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection(&self, reclaimed: usize) {
        self.collector_cycles.fetch_add(1, Ordering::Relaxed);
        self.reclaimed_blocks
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
    }

    pub fn record_defragmentation(&self) {
        self.defragmentations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_operation_metrics(&self, op: OpCode) -> Option<OperationMetrics> {
        self.operations
            .lock()
            .ok()
            .and_then(|operations| operations.get(&op).cloned())
    }

    /// Per-operation stats ordered by op code.
    pub fn operation_summary(&self) -> Vec<(OpCode, OperationMetrics)> {
        let mut summary: Vec<(OpCode, OperationMetrics)> = self
            .operations
            .lock()
            .map(|operations| operations.iter().map(|(op, m)| (*op, m.clone())).collect())
            .unwrap_or_default();
        summary.sort_by_key(|(op, _)| *op as u8);
        summary
    }

    pub fn get_error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn allocation_failures(&self) -> u64 {
        self.allocation_failures.load(Ordering::Relaxed)
    }

    pub fn reclaimed_blocks(&self) -> u64 {
        self.reclaimed_blocks.load(Ordering::Relaxed)
    }

    pub fn collector_cycles(&self) -> u64 {
        self.collector_cycles.load(Ordering::Relaxed)
    }

    pub fn defragmentations(&self) -> u64 {
        self.defragmentations.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn log_summary(&self, logger: &StructuredLogger) {
        logger.log_metric("uptime", self.uptime().as_secs_f64(), "s");
        logger.log_metric("errors", self.get_error_count() as f64, "");
        logger.log_metric("allocation_failures", self.allocation_failures() as f64, "");
        logger.log_metric("collector_cycles", self.collector_cycles() as f64, "");
        logger.log_metric("reclaimed_blocks", self.reclaimed_blocks() as f64, "");
        logger.log_metric("defragmentations", self.defragmentations() as f64, "");

        for (op, stats) in self.operation_summary() {
            logger.log_operation(
                Level::Info,
                op.name(),
                &[
                    ("count", stats.count.to_string()),
                    ("failures", stats.failures.to_string()),
                    ("avg", format!("{:?}", stats.average_latency())),
                    ("p50", format!("{:?}", stats.p50())),
                    ("p95", format!("{:?}", stats.p95())),
                    ("p99", format!("{:?}", stats.p99())),
                ],
            );
        }
    }
}

impl Default for HeapMetrics {
    fn default() -> Self {
        Self::new()
    }
}
