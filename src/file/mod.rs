mod block;
mod cache;
mod error;
mod file_manager;

pub use block::{BlockMut, BlockRef, NO_BLOCK};
pub use cache::BlockCache;
pub use error::{FileError, FileResult};
pub use file_manager::{FileId, FileManager};

/// Block size in bytes (4KB)
pub const BLOCK_SIZE: usize = 4096;

/// Bytes of a block taken by the chain header (prev, next, count)
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Number of frames in the block cache
pub const CACHE_CAPACITY: usize = 300;
