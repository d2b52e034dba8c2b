use serde::Serialize;

/// Stable identifier of a block. Ids are handed out by a monotonically
/// increasing counter and never reused.
pub type BlockId = i64;

/// Id value meaning "no block". Never returned by a successful create.
pub const NULL_BLOCK_ID: BlockId = -1;

/// Descriptor of one region inside the arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub id: BlockId,
    pub offset: usize,
    pub size: usize,
    pub type_tag: String,
    /// No floor is enforced unless the table's policy says otherwise.
    pub ref_count: i64,
    /// Flipped to false by the collector; the entry stays until defragmentation.
    pub allocated: bool,
}

impl Block {
    pub fn new(id: BlockId, offset: usize, size: usize, type_tag: &str) -> Self {
        Self {
            id,
            offset,
            size,
            type_tag: type_tag.to_string(),
            ref_count: 1,
            allocated: true,
        }
    }

    /// One past the last byte of the block.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.end()
    }

    pub fn is_collectable(&self) -> bool {
        self.allocated && self.ref_count <= 0
    }

    pub fn status_label(&self) -> &'static str {
        if self.allocated {
            "Allocated"
        } else {
            "Free"
        }
    }
}
