use thiserror::Error;

/// Stable status codes exposed through the C ABI.
///
/// The numeric values are part of the external interface and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Syntax = 1,
    Type = 2,
    Constraint = 3,
    NotFound = 4,
    Busy = 5,
    Corrupt = 6,
    Io = 7,
    Misuse = 8,
    Range = 9,
    OutOfMemory = 10,
}

#[derive(Error, Debug)]
pub enum ZqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syntax error at line {line}, column {column} near '{token}': {message}")]
    Syntax {
        line: u32,
        column: u32,
        token: String,
        message: String,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database is busy: {0}")]
    Busy(String),

    #[error("data corruption: {0}")]
    Corrupt(String),

    #[error("API misuse: {0}")]
    Misuse(String),

    #[error("parameter index out of range: {0}")]
    Range(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

impl ZqError {
    /// Map this error onto its stable C-ABI discriminant.
    pub fn code(&self) -> ErrorCode {
        match self {
            ZqError::Io(_) => ErrorCode::Io,
            ZqError::Syntax { .. } => ErrorCode::Syntax,
            ZqError::Type(_) => ErrorCode::Type,
            ZqError::Constraint(_) => ErrorCode::Constraint,
            ZqError::NotFound(_) => ErrorCode::NotFound,
            ZqError::Busy(_) => ErrorCode::Busy,
            ZqError::Corrupt(_) => ErrorCode::Corrupt,
            ZqError::Misuse(_) => ErrorCode::Misuse,
            ZqError::Range(_) => ErrorCode::Range,
            ZqError::OutOfMemory(_) => ErrorCode::OutOfMemory,
        }
    }

    /// True for errors that abort the enclosing transaction and leave the
    /// connection read-only until reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ZqError::Corrupt(_) | ZqError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ZqError>;
