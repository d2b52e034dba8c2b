//! Length-prefixed framing: a little-endian `u32` body length, then the body.
//!
//! The client speaks it over a blocking `std::net::TcpStream`; the server
//! over tokio streams.

use crate::error::{HeapError, Result};
use std::io::{ErrorKind, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

fn check_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_SIZE {
        return Err(HeapError::Protocol(format!(
            "Frame of {} bytes exceeds maximum of {} bytes",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

fn io_error(e: std::io::Error) -> HeapError {
    HeapError::Connection(e.to_string())
}

pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    check_len(body.len())?;
    writer
        .write_all(&(body.len() as u32).to_le_bytes())
        .map_err(io_error)?;
    writer.write_all(body).map_err(io_error)?;
    writer.flush().map_err(io_error)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            HeapError::Connection("Connection closed by server".to_string())
        } else {
            io_error(e)
        }
    })?;
    let len = u32::from_le_bytes(len) as usize;
    check_len(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(io_error)?;
    Ok(body)
}

pub async fn write_frame_async<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    check_len(body.len())?;
    writer
        .write_all(&(body.len() as u32).to_le_bytes())
        .await
        .map_err(io_error)?;
    writer.write_all(body).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame_async<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error(e)),
    }
    let len = u32::from_le_bytes(len) as usize;
    check_len(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(io_error)?;
    Ok(Some(body))
}
