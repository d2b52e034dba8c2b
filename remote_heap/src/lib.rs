pub mod client;
pub mod config;
pub mod dump;
pub mod engine;
mod error;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod service;

pub use client::{BlockCodec, Connection, RemoteHandle};
pub use config::{ClientConfig, DumpFormat, RefCountPolicy, ServerConfig};
pub use dump::{DumpWriter, NoopSink, SnapshotSink, TableSnapshot};
pub use engine::{BlockId, BlockTable, MemoryManager, NULL_BLOCK_ID};
pub use error::{ErrorCategory, ErrorCode, HeapError, Result, StructuredError};
pub use server::ServerHandle;
pub use service::MemoryService;
