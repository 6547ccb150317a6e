use thiserror::Error;

use crate::file::FileError;
use crate::index::IndexError;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Value for column {column} is {len} bytes, exceeds declared length {max}")]
    ValueLengthOverflow {
        column: String,
        len: usize,
        max: usize,
    },

    #[error("Expected {expected} values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Attribute {0} not found")]
    AttributeNotFound(String),

    #[error("Primary key conflict: duplicate key value")]
    PrimaryKeyConflict,

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type RecordResult<T> = Result<T, RecordError>;
