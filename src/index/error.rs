use thiserror::Error;

use crate::file::FileError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Key column too wide for an index node: {0} bytes")]
    KeyTooWide(usize),

    #[error("Index structure corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    File(#[from] FileError),
}

pub type IndexResult<T> = Result<T, IndexError>;
