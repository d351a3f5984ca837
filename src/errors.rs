use thiserror::Error;

/// Errors produced by the engine.
///
/// `NotFound` and `Closed` are routine outcomes callers are expected to handle;
/// the remaining variants are fatal for the owning [`crate::Engine`] instance
/// (see the poisoning rules on [`crate::Engine`]).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,

    #[error("engine is closed")]
    Closed,

    #[error("corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: u64, reason: String },

    #[error("corrupt write-ahead log: {0}")]
    CorruptWal(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("batch insert received out-of-order keys")]
    OutOfOrderBatch,
}

impl From<bincode::error::EncodeError> for EngineError {
    fn from(e: bincode::error::EncodeError) -> Self {
        EngineError::CorruptPage { page_id: 0, reason: e.to_string() }
    }
}

impl From<bincode::error::DecodeError> for EngineError {
    fn from(e: bincode::error::DecodeError) -> Self {
        EngineError::CorruptPage { page_id: 0, reason: e.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
