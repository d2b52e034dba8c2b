use super::codec::BlockCodec;
use super::connection::Connection;
use crate::engine::{BlockId, NULL_BLOCK_ID};
use crate::error::{HeapError, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Pointer-like handle to a `T` stored in a remote block.
///
/// The handle holds only the block id and contributes exactly one count to
/// the block's remote reference counter for as long as it is non-null:
///
/// - [`new`](Self::new) allocates a block; the server starts it at 1.
/// - `clone` increments the counter before the copy adopts the id.
/// - `clone_from` decrements the old id, adopts the new id, then increments
///   it. When both ids are the same the counter is one low between the two
///   calls, and a collector pass in that window can reclaim a block that is
///   still referenced. The ordering is kept as is.
/// - `drop` decrements once.
///
/// `clone` and `drop` cannot return errors; their failures are logged.
/// [`read`](Self::read) always fetches a fresh copy, so mutating the returned
/// value never changes the remote block.
pub struct RemoteHandle<T: BlockCodec> {
    id: BlockId,
    connection: Arc<Connection>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: BlockCodec> RemoteHandle<T> {
    /// Allocates a zeroed block of `T::SIZE` bytes. No retry on failure.
    pub fn new(connection: &Arc<Connection>) -> Result<Self> {
        let id = connection.create(T::SIZE, &T::type_tag())?;
        Ok(Self::adopt(connection, id))
    }

    /// Allocates a block and writes `value` into it.
    pub fn with_value(connection: &Arc<Connection>, value: &T) -> Result<Self> {
        let handle = Self::new(connection)?;
        handle.write(value)?;
        Ok(handle)
    }

    pub fn null(connection: &Arc<Connection>) -> Self {
        Self::adopt(connection, NULL_BLOCK_ID)
    }

    /// Takes a new counted reference to an existing block, e.g. an id read
    /// out of another block. The null id yields a null handle.
    pub fn retain(connection: &Arc<Connection>, id: BlockId) -> Result<Self> {
        if id != NULL_BLOCK_ID {
            connection.increase_ref_count(id)?;
        }
        Ok(Self::adopt(connection, id))
    }

    fn adopt(connection: &Arc<Connection>, id: BlockId) -> Self {
        Self {
            id,
            connection: Arc::clone(connection),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id == NULL_BLOCK_ID
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn write(&self, value: &T) -> Result<()> {
        if self.is_null() {
            return Err(HeapError::NullHandle("written"));
        }
        let bytes = value.encode();
        if bytes.len() != T::SIZE {
            return Err(HeapError::SizeMismatch {
                expected: T::SIZE,
                actual: bytes.len(),
            });
        }
        self.connection.set(self.id, &bytes)
    }

    pub fn read(&self) -> Result<T> {
        if self.is_null() {
            return Err(HeapError::NullHandle("dereferenced"));
        }
        let bytes = self.connection.get(self.id, T::SIZE)?;
        if bytes.len() != T::SIZE {
            return Err(HeapError::SizeMismatch {
                expected: T::SIZE,
                actual: bytes.len(),
            });
        }
        T::decode(&bytes)
    }

    /// Gives up the handle without releasing its reference. The caller now
    /// owns that count, typically by storing the id inside another block.
    pub fn into_id(mut self) -> BlockId {
        std::mem::replace(&mut self.id, NULL_BLOCK_ID)
    }

    /// Releases this handle's reference and leaves it null.
    pub fn reset(&mut self) -> Result<()> {
        if self.is_null() {
            return Ok(());
        }
        let id = std::mem::replace(&mut self.id, NULL_BLOCK_ID);
        self.connection.decrease_ref_count(id)
    }

    fn release_quietly(&self, id: BlockId) {
        if let Err(e) = self.connection.decrease_ref_count(id) {
            log::warn!("Failed to release block {}: {}", id, e);
        }
    }

    fn retain_quietly(&self, id: BlockId) {
        if let Err(e) = self.connection.increase_ref_count(id) {
            log::warn!("Failed to retain block {}: {}", id, e);
        }
    }
}

impl<T: BlockCodec> Clone for RemoteHandle<T> {
    fn clone(&self) -> Self {
        if !self.is_null() {
            self.retain_quietly(self.id);
        }
        Self::adopt(&self.connection, self.id)
    }

    fn clone_from(&mut self, source: &Self) {
        if !self.is_null() {
            self.release_quietly(self.id);
        }
        self.id = source.id;
        self.connection = Arc::clone(&source.connection);
        if !self.is_null() {
            self.retain_quietly(self.id);
        }
    }
}

impl<T: BlockCodec> Drop for RemoteHandle<T> {
    fn drop(&mut self) {
        if !self.is_null() {
            self.release_quietly(self.id);
        }
    }
}

impl<T: BlockCodec> fmt::Debug for RemoteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .field("address", &self.connection.address())
            .finish()
    }
}
