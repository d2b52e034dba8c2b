use super::block::{Block, BlockId};
use crate::config::RefCountPolicy;
use crate::dump::TableSnapshot;
use crate::error::{HeapError, Result};

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefragReport {
    /// Stale (reclaimed) entries dropped from the table.
    pub removed_entries: usize,
    /// Live blocks whose bytes were moved to a lower offset.
    pub moved_blocks: usize,
    /// First free offset after compaction.
    pub compacted_end: usize,
}

/// The arena and its block table.
///
/// Not synchronized; [`MemoryManager`](super::MemoryManager) owns the single
/// lock around it. Every entry, live or stale, occupies its byte range until
/// [`defragment`](Self::defragment) drops the stale ones.
pub struct BlockTable {
    memory: Vec<u8>,
    blocks: Vec<Block>,
    next_id: BlockId,
    policy: RefCountPolicy,
    defragmentations: u64,
}

impl BlockTable {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, RefCountPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: RefCountPolicy) -> Self {
        Self {
            memory: vec![0u8; capacity],
            blocks: Vec::new(),
            next_id: 1,
            policy,
            defragmentations: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn policy(&self) -> RefCountPolicy {
        self.policy
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Looks up an entry by id, whether allocated or stale.
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn live_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.allocated).count()
    }

    pub fn live_bytes(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.allocated)
            .map(|b| b.size)
            .sum()
    }

    pub fn defragmentation_count(&self) -> u64 {
        self.defragmentations
    }

    /// Bytes currently stored for `block`.
    pub fn content(&self, block: &Block) -> &[u8] {
        &self.memory[block.range()]
    }

    pub fn create(&mut self, size: usize, type_tag: &str) -> Result<BlockId> {
        let offset = match self.find_free_space(size) {
            Some(offset) => offset,
            None => {
                let report = self.defragment();
                log::info!(
                    "Defragmented arena: removed={}, moved={}, compacted_end={}",
                    report.removed_entries,
                    report.moved_blocks,
                    report.compacted_end
                );
                self.find_free_space(size)
                    .ok_or(HeapError::Allocation { size })?
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        self.blocks.push(Block::new(id, offset, size, type_tag));
        Ok(id)
    }

    pub fn set(&mut self, id: BlockId, bytes: &[u8]) -> Result<()> {
        let index = self.allocated_index(id)?;
        let block = &self.blocks[index];
        if bytes.len() > block.size {
            return Err(HeapError::Bounds(format!(
                "value of {} bytes exceeds block {} capacity of {} bytes",
                bytes.len(),
                id,
                block.size
            )));
        }

        let offset = block.offset;
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns `min(max_len, block.size)` bytes from the start of the block.
    pub fn get(&self, id: BlockId, max_len: usize) -> Result<Vec<u8>> {
        let index = self.allocated_index(id)?;
        let block = &self.blocks[index];
        let len = max_len.min(block.size);
        Ok(self.memory[block.offset..block.offset + len].to_vec())
    }

    /// Returns the new count.
    pub fn increase_ref_count(&mut self, id: BlockId) -> Result<i64> {
        let index = self.allocated_index(id)?;
        let block = &mut self.blocks[index];
        block.ref_count += 1;
        Ok(block.ref_count)
    }

    /// Returns the new count. Never frees anything; that is the collector's job.
    pub fn decrease_ref_count(&mut self, id: BlockId) -> Result<i64> {
        let index = self.allocated_index(id)?;
        let policy = self.policy;
        let block = &mut self.blocks[index];
        match policy {
            RefCountPolicy::Unbounded => block.ref_count -= 1,
            RefCountPolicy::ClampAtZero => block.ref_count = (block.ref_count - 1).max(0),
            RefCountPolicy::RejectBelowZero => {
                if block.ref_count <= 0 {
                    return Err(HeapError::RefCountUnderflow(id));
                }
                block.ref_count -= 1;
            }
        }
        Ok(block.ref_count)
    }

    /// First-fit over entries sorted by offset: the gap before the first
    /// entry, the gaps between entries, then the tail of the arena.
    ///
    /// Sorts the table in place.
    pub fn find_free_space(&mut self, size: usize) -> Option<usize> {
        if size > self.capacity() {
            return None;
        }
        if self.blocks.is_empty() {
            return Some(0);
        }

        self.blocks.sort_by_key(|b| b.offset);

        let mut cursor = 0usize;
        for block in &self.blocks {
            if block.offset >= cursor && block.offset - cursor >= size {
                return Some(cursor);
            }
            cursor = cursor.max(block.end());
        }

        if self.capacity() - cursor >= size {
            Some(cursor)
        } else {
            None
        }
    }

    /// Drops stale entries and slides every live block down to the next
    /// contiguous offset, in ascending offset order. Vacated bytes are zeroed.
    pub fn defragment(&mut self) -> DefragReport {
        let high_water = self.blocks.iter().map(Block::end).max().unwrap_or(0);
        let before = self.blocks.len();
        self.blocks.retain(|b| b.allocated);
        let removed_entries = before - self.blocks.len();

        self.blocks.sort_by_key(|b| b.offset);

        let mut current_offset = 0usize;
        let mut moved_blocks = 0usize;
        for block in self.blocks.iter_mut() {
            if block.offset != current_offset {
                self.memory.copy_within(block.range(), current_offset);
                block.offset = current_offset;
                moved_blocks += 1;
            }
            current_offset += block.size;
        }

        if high_water > current_offset {
            self.memory[current_offset..high_water].fill(0);
        }

        self.defragmentations += 1;
        DefragReport {
            removed_entries,
            moved_blocks,
            compacted_end: current_offset,
        }
    }

    /// One collector pass: every allocated entry with `ref_count <= 0` is
    /// marked free and its bytes zeroed. Entries stay in the table.
    pub fn collect_garbage(&mut self) -> Vec<BlockId> {
        let mut reclaimed = Vec::new();
        for block in self.blocks.iter_mut().filter(|b| b.is_collectable()) {
            block.allocated = false;
            self.memory[block.offset..block.offset + block.size].fill(0);
            reclaimed.push(block.id);
        }
        reclaimed
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot::capture(self)
    }

    /// Checks that no two allocated blocks overlap and that every entry lies
    /// inside the arena.
    pub fn verify_layout(&self) -> Result<()> {
        for block in &self.blocks {
            if block.end() > self.capacity() {
                return Err(HeapError::InternalError(format!(
                    "block {} ends at {} beyond arena capacity {}",
                    block.id,
                    block.end(),
                    self.capacity()
                )));
            }
        }

        let mut live: Vec<&Block> = self.blocks.iter().filter(|b| b.allocated).collect();
        live.sort_by_key(|b| b.offset);
        for pair in live.windows(2) {
            if pair[0].size > 0 && pair[1].size > 0 && pair[1].offset < pair[0].end() {
                return Err(HeapError::InternalError(format!(
                    "blocks {} and {} overlap",
                    pair[0].id, pair[1].id
                )));
            }
        }
        Ok(())
    }

    fn allocated_index(&self, id: BlockId) -> Result<usize> {
        self.blocks
            .iter()
            .position(|b| b.id == id && b.allocated)
            .ok_or(HeapError::InvalidHandle(id))
    }
}
