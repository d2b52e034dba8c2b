use super::types::{OpCode, Request, Response};
use super::{MAGIC, VERSION};
use crate::error::{HeapError, Result, StructuredError};

const HEADER_SIZE: usize = 7; // magic(4) + version(2) + op(1)

/// Bounds-checked little-endian cursor over one frame body.
struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                HeapError::Protocol(format!(
                    "Buffer too small: need {} bytes at offset {}, got {}",
                    len,
                    self.offset,
                    self.buffer.len()
                ))
            })?;
        let slice = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(HeapError::Protocol(format!(
                "Invalid flag byte 0x{:02X} at offset {}",
                other,
                self.offset - 1
            ))),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn rest(&self) -> &'a [u8] {
        &self.buffer[self.offset..]
    }

    fn advance(&mut self, len: usize) {
        self.offset += len;
    }

    fn finish(&self) -> Result<()> {
        let trailing = self.buffer.len() - self.offset;
        if trailing != 0 {
            return Err(HeapError::Protocol(format!(
                "{} trailing bytes after message",
                trailing
            )));
        }
        Ok(())
    }
}

fn read_header(reader: &mut Reader<'_>) -> Result<OpCode> {
    if reader.buffer.len() < HEADER_SIZE {
        return Err(HeapError::Protocol(format!(
            "Buffer too small: need at least {} bytes, got {}",
            HEADER_SIZE,
            reader.buffer.len()
        )));
    }

    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(HeapError::Protocol(format!(
            "Invalid magic number: expected 0x{:08X}, got 0x{:08X}",
            MAGIC, magic
        )));
    }

    let version = reader.u16()?;
    if version != VERSION {
        return Err(HeapError::Protocol(format!(
            "Invalid version: expected {}, got {}",
            VERSION, version
        )));
    }

    let op = reader.u8()?;
    OpCode::from_u8(op)
        .ok_or_else(|| HeapError::Protocol(format!("Unknown operation code {}", op)))
}

pub struct RequestDecoder;

impl RequestDecoder {
    pub fn decode(buffer: &[u8]) -> Result<Request> {
        let mut reader = Reader::new(buffer);
        let op = read_header(&mut reader)?;

        let request = match op {
            OpCode::Create => {
                let size = reader.u64()?;
                let tag_len = reader.u16()? as usize;
                let type_tag = String::from_utf8(reader.take(tag_len)?.to_vec())
                    .map_err(|e| HeapError::Protocol(format!("Type tag is not UTF-8: {}", e)))?;
                Request::Create { size, type_tag }
            }
            OpCode::Set => {
                let id = reader.i64()?;
                let value = reader.bytes()?;
                Request::Set { id, value }
            }
            OpCode::Get => Request::Get { id: reader.i64()? },
            OpCode::IncreaseRefCount => Request::IncreaseRefCount { id: reader.i64()? },
            OpCode::DecreaseRefCount => Request::DecreaseRefCount { id: reader.i64()? },
        };

        reader.finish()?;
        Ok(request)
    }
}

pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn decode(buffer: &[u8]) -> Result<Response> {
        let mut reader = Reader::new(buffer);
        let op = read_header(&mut reader)?;

        let success = reader.bool()?;
        let id = reader.i64()?;
        let value = reader.bytes()?;

        let error = if reader.bool()? {
            let (error, consumed) = StructuredError::deserialize(reader.rest()).ok_or_else(|| {
                HeapError::Protocol("Malformed error block in response".to_string())
            })?;
            reader.advance(consumed);
            Some(error)
        } else {
            None
        };

        reader.finish()?;
        Ok(Response {
            op,
            success,
            id,
            value,
            error,
        })
    }
}
