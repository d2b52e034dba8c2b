pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod types;

/// "MPTR"
pub const MAGIC: u32 = 0x4D505452;
pub const VERSION: u16 = 1;

pub use decoder::{RequestDecoder, ResponseDecoder};
pub use encoder::{RequestEncoder, ResponseEncoder};
pub use frame::{read_frame, read_frame_async, write_frame, write_frame_async, MAX_FRAME_SIZE};
pub use types::{OpCode, Request, Response};
