//! Error taxonomy for the player facade and patch bank loader.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MusOplError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("player not initialized")]
    NotInitialized,
    #[error("already initialized")]
    AlreadyInitialized,
}

pub type MusOplResult<T> = Result<T, MusOplError>;

impl MusOplError {
    /// Short, stable description of the error kind, independent of any `InvalidData` payload.
    pub fn describe(&self) -> &'static str {
        match self {
            MusOplError::InvalidParam => "invalid parameter",
            MusOplError::OutOfMemory => "out of memory",
            MusOplError::InvalidData(_) => "invalid data",
            MusOplError::NotInitialized => "player not initialized",
            MusOplError::AlreadyInitialized => "already initialized",
        }
    }
}
