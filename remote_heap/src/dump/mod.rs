//! Read-only views of the block table and the sinks that consume them.
//!
//! The service captures a [`TableSnapshot`] under the table lock after every
//! mutating request and hands it to a [`SnapshotSink`] once the lock is
//! released. Sinks never see live table state.

pub mod writer;

pub use writer::{log_memory_state, DumpWriter};

use crate::engine::{Block, BlockId, BlockTable};
use chrono::{DateTime, Local};
use serde::Serialize;

/// Bytes of block content kept in each snapshot entry.
pub const PREVIEW_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSnapshot {
    pub id: BlockId,
    pub offset: usize,
    pub size: usize,
    pub type_tag: String,
    pub ref_count: i64,
    pub allocated: bool,
    pub preview: Vec<u8>,
}

impl BlockSnapshot {
    fn capture(block: &Block, content: &[u8]) -> Self {
        Self {
            id: block.id,
            offset: block.offset,
            size: block.size,
            type_tag: block.type_tag.clone(),
            ref_count: block.ref_count,
            allocated: block.allocated,
            preview: content[..content.len().min(PREVIEW_LEN)].to_vec(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.allocated {
            "Allocated"
        } else {
            "Free"
        }
    }

    /// True when the block holds more bytes than the preview shows.
    pub fn is_truncated(&self) -> bool {
        self.size > self.preview.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    pub taken_at: DateTime<Local>,
    pub capacity: usize,
    pub blocks: Vec<BlockSnapshot>,
}

impl TableSnapshot {
    /// Copies every table entry, stale ones included, in table order.
    pub fn capture(table: &BlockTable) -> Self {
        Self {
            taken_at: Local::now(),
            capacity: table.capacity(),
            blocks: table
                .blocks()
                .iter()
                .map(|block| BlockSnapshot::capture(block, table.content(block)))
                .collect(),
        }
    }

    pub fn allocated_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.allocated).count()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.allocated)
            .map(|b| b.size)
            .sum()
    }

    pub fn timestamp_label(&self) -> String {
        self.taken_at.format("%Y%m%d_%H%M%S_%3f").to_string()
    }
}

/// Receives a snapshot after each mutating request.
pub trait SnapshotSink: Send + Sync {
    fn record(&self, event: &str, snapshot: &TableSnapshot);

    /// When false the service skips capturing snapshots entirely.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl SnapshotSink for NoopSink {
    fn record(&self, _event: &str, _snapshot: &TableSnapshot) {}

    fn is_enabled(&self) -> bool {
        false
    }
}
