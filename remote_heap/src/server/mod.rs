use crate::config::ServerConfig;
use crate::dump::{log_memory_state, DumpWriter, NoopSink, SnapshotSink};
use crate::engine::MemoryManager;
use crate::error::{HeapError, Result};
use crate::observability::StructuredLogger;
use crate::protocol::{read_frame_async, write_frame_async, RequestDecoder, ResponseEncoder};
use crate::service::MemoryService;
use log::Level;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running memory manager server: its runtime, listener task and collector.
///
/// Must be created and shut down from outside any tokio runtime.
pub struct ServerHandle {
    runtime: Option<Runtime>,
    local_addr: SocketAddr,
    manager: Arc<MemoryManager>,
    service: Arc<MemoryService>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Uses a [`DumpWriter`] when a dump folder is configured, otherwise no sink.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let sink: Arc<dyn SnapshotSink> = match &config.dump_folder {
            Some(folder) => Arc::new(DumpWriter::new(folder, config.dump_format)?),
            None => Arc::new(NoopSink),
        };
        Self::start(config, sink)
    }

    pub fn start(config: &ServerConfig, sink: Arc<dyn SnapshotSink>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("heap-server")
            .build()
            .map_err(|e| HeapError::InternalError(format!("Failed to build runtime: {}", e)))?;

        let capacity = config.arena_capacity();
        let manager = Arc::new(MemoryManager::with_policy(
            capacity,
            config.ref_count_policy,
        ));
        let service = Arc::new(MemoryService::new(
            manager.clone(),
            sink,
            config.max_read_len,
        ));

        let address = config.bind_address();
        let listener = runtime
            .block_on(TcpListener::bind(&address))
            .map_err(|e| HeapError::Connection(format!("Failed to bind {}: {}", address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HeapError::Connection(e.to_string()))?;

        manager.start_collector(config.gc_interval())?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = runtime.spawn(accept_loop(listener, service.clone(), shutdown_rx));

        log::info!(
            "Memory manager listening on {} (arena={} bytes, collector every {:?})",
            local_addr,
            capacity,
            config.gc_interval()
        );

        Ok(Self {
            runtime: Some(runtime),
            local_addr,
            manager,
            service,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    pub fn service(&self) -> &Arc<MemoryService> {
        &self.service
    }

    /// Blocks until Ctrl-C is received.
    pub fn wait_for_ctrl_c(&self) -> Result<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| HeapError::InternalError("Server already shut down".to_string()))?;
        runtime
            .block_on(tokio::signal::ctrl_c())
            .map_err(|e| HeapError::InternalError(format!("Failed to wait for Ctrl-C: {}", e)))
    }

    /// Stops accepting, tears down the runtime and its connection tasks, then
    /// stops and joins the collector.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = runtime.block_on(task) {
                log::error!("Accept loop ended abnormally: {}", e);
            }
        }
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

        self.manager.stop_collector();
        if let Ok(snapshot) = self.manager.snapshot() {
            log_memory_state(&snapshot);
        }

        self.manager.metrics().log_summary(&StructuredLogger::default());
        log::info!("Memory manager on {} stopped", self.local_addr);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: Arc<MemoryService>,
    mut shutdown: watch::Receiver<bool>,
) {
    let logger = StructuredLogger::default();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    logger.log_connection(Level::Info, &peer.to_string(), "accepted");
                    tokio::spawn(serve_connection(stream, peer, service.clone(), logger));
                }
                Err(e) => log::warn!("Accept failed: {}", e),
            },
        }
    }
}

/// Request loop for one client. Any framing or decoding error closes the
/// connection; other connections are unaffected.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    service: Arc<MemoryService>,
    logger: StructuredLogger,
) {
    let _ = stream.set_nodelay(true);
    let peer_label = peer.to_string();

    loop {
        let body = match read_frame_async(&mut stream).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Dropping {}: {}", peer_label, e);
                break;
            }
        };

        let request = match RequestDecoder::decode(&body) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Malformed request from {}: {}", peer_label, e);
                break;
            }
        };
        log::debug!("{} -> {}", peer_label, request.op_code().name());

        let worker = service.clone();
        let response = match tokio::task::spawn_blocking(move || worker.handle(request)).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Request task for {} failed: {}", peer_label, e);
                break;
            }
        };

        let encoded = ResponseEncoder::encode(&response);
        if let Err(e) = write_frame_async(&mut stream, &encoded).await {
            log::warn!("Dropping {}: {}", peer_label, e);
            break;
        }
    }

    logger.log_connection(Level::Info, &peer_label, "closed");
}
