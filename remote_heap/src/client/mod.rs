pub mod codec;
pub mod connection;
pub mod handle;

pub use codec::{expect_len, BlockCodec};
pub use connection::Connection;
pub use handle::RemoteHandle;
