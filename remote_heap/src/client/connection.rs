use crate::config::ClientConfig;
use crate::engine::{BlockId, NULL_BLOCK_ID};
use crate::error::{HeapError, Result};
use crate::observability::StructuredLogger;
use crate::protocol::{
    read_frame, write_frame, Request, RequestEncoder, Response, ResponseDecoder,
};
use log::Level;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};

/// A session with one memory manager server.
///
/// Calls are synchronous and serialized on one TCP stream. Share it between
/// handles with `Arc`. Any transport failure drops the stream; calls then
/// fail with [`HeapError::NotConnected`] until [`connect`](Self::connect)
/// succeeds again.
pub struct Connection {
    config: ClientConfig,
    stream: Mutex<Option<TcpStream>>,
    logger: StructuredLogger,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    pub fn new(address: impl Into<String>) -> Self {
        Self::from_config(&ClientConfig::new(address))
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            config: config.clone(),
            stream: Mutex::new(None),
            logger: StructuredLogger::default(),
        }
    }

    /// `Connection::new` followed by `connect`, wrapped for sharing.
    pub fn open(address: impl Into<String>) -> Result<Arc<Self>> {
        let connection = Arc::new(Self::new(address));
        connection.connect()?;
        Ok(connection)
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<TcpStream>>> {
        self.stream
            .lock()
            .map_err(|_| HeapError::InternalError("Failed to lock connection mutex".to_string()))
    }

    /// Opens the stream and checks that the server answers. No-op when already connected.
    ///
    /// The check is an `IncreaseRefCount` on the null id; the server's
    /// rejection of it is expected and ignored. Only a transport failure
    /// fails the connect.
    pub fn connect(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if guard.is_some() {
            return Ok(());
        }

        let address = &self.config.address;
        let mut stream = TcpStream::connect(address).map_err(|e| {
            HeapError::Connection(format!("Failed to connect to {}: {}", address, e))
        })?;
        let _ = stream.set_nodelay(true);
        let timeout = self.config.io_timeout();
        stream
            .set_read_timeout(timeout)
            .and_then(|_| stream.set_write_timeout(timeout))
            .map_err(|e| HeapError::Connection(e.to_string()))?;

        exchange(&mut stream, &Request::IncreaseRefCount { id: NULL_BLOCK_ID }).map_err(|e| {
            HeapError::Connection(format!("Server at {} did not answer: {}", address, e))
        })?;

        *guard = Some(stream);
        self.logger.log_connection(Level::Info, address, "opened");
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        if let Some(stream) = self.lock()?.take() {
            let _ = stream.shutdown(Shutdown::Both);
            self.logger
                .log_connection(Level::Info, &self.config.address, "closed");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn call(&self, request: Request) -> Result<Response> {
        let mut guard = self.lock()?;
        let stream = guard.as_mut().ok_or(HeapError::NotConnected)?;

        match exchange(stream, &request) {
            Ok(response) => response.into_result(),
            Err(e) => {
                *guard = None;
                self.logger.log_error(
                    &e.to_string(),
                    &[
                        ("operation", request.op_code().name().to_string()),
                        ("address", self.config.address.clone()),
                    ],
                );
                Err(e)
            }
        }
    }

    pub fn create(&self, size: usize, type_tag: &str) -> Result<BlockId> {
        let response = self.call(Request::Create {
            size: size as u64,
            type_tag: type_tag.to_string(),
        })?;
        Ok(response.id)
    }

    pub fn set(&self, id: BlockId, value: &[u8]) -> Result<()> {
        self.call(Request::Set {
            id,
            value: value.to_vec(),
        })
        .map(|_| ())
    }

    /// Returns at most `max_len` bytes; longer replies are truncated here.
    pub fn get(&self, id: BlockId, max_len: usize) -> Result<Vec<u8>> {
        let mut value = self.call(Request::Get { id })?.value;
        value.truncate(max_len);
        Ok(value)
    }

    pub fn increase_ref_count(&self, id: BlockId) -> Result<()> {
        self.call(Request::IncreaseRefCount { id }).map(|_| ())
    }

    pub fn decrease_ref_count(&self, id: BlockId) -> Result<()> {
        self.call(Request::DecreaseRefCount { id }).map(|_| ())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// One request/response round trip. Errors here leave the stream in an
/// unknown state.
fn exchange(stream: &mut TcpStream, request: &Request) -> Result<Response> {
    write_frame(stream, &RequestEncoder::encode(request))?;
    let response = ResponseDecoder::decode(&read_frame(stream)?)?;
    if response.op != request.op_code() {
        return Err(HeapError::Protocol(format!(
            "Response to {} carried operation {}",
            request.op_code().name(),
            response.op.name()
        )));
    }
    Ok(response)
}
