use crate::error::{HeapError, Result};

/// Fixed-size byte representation of a value stored in a remote block.
///
/// `encode` must return exactly `SIZE` bytes and `decode` must accept exactly
/// `SIZE` bytes. The type tag is recorded on the server for inspection only.
pub trait BlockCodec: Sized {
    const SIZE: usize;

    fn type_tag() -> String {
        std::any::type_name::<Self>().to_string()
    }

    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Fails with `SizeMismatch` unless `bytes` is exactly `expected` long.
pub fn expect_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(HeapError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

macro_rules! impl_le_codec {
    ($($t:ty),* $(,)?) => {
        $(
            impl BlockCodec for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    let array: [u8; std::mem::size_of::<$t>()] =
                        bytes.try_into().map_err(|_| HeapError::SizeMismatch {
                            expected: std::mem::size_of::<$t>(),
                            actual: bytes.len(),
                        })?;
                    Ok(<$t>::from_le_bytes(array))
                }
            }
        )*
    };
}

impl_le_codec!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl BlockCodec for bool {
    const SIZE: usize = 1;

    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        expect_len(bytes, Self::SIZE)?;
        Ok(bytes[0] != 0)
    }
}

impl<const N: usize> BlockCodec for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bytes.try_into().map_err(|_| HeapError::SizeMismatch {
            expected: N,
            actual: bytes.len(),
        })
    }
}
