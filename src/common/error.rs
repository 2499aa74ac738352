use thiserror::Error;

use super::types::{AgentId, TaskId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Agent not found: {id}")]
    AgentNotFound { id: AgentId },

    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Invalid task transition for task {id}: {from} -> {to}")]
    InvalidTransition { id: TaskId, from: String, to: String },

    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad magic number: {found:?}")]
    BadMagic { found: [u8; 4] },

    #[error("Unsupported format version: expected {expected}, got {found}")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("Truncated state file: {0}")]
    Truncated(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Too many {what} to encode: {count}")]
    TooLarge { what: &'static str, count: usize },

    #[error("Grid mismatch: file is {file_width}x{file_height}, live grid is {width}x{height}")]
    GridMismatch {
        file_width: i32,
        file_height: i32,
        width: i32,
        height: i32,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                StorageError::Truncated(io.to_string())
            }
            bincode::ErrorKind::Io(io) => StorageError::Io(io),
            other => StorageError::Encoding(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type ApplicationResult<T> = Result<T, ApplicationError>;
