pub mod block;
pub mod collector;
pub mod manager;
pub mod table;

pub use block::{Block, BlockId, NULL_BLOCK_ID};
pub use collector::GarbageCollector;
pub use manager::{MemoryManager, SharedBlockTable};
pub use table::{BlockTable, DefragReport};
