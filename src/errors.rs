use thiserror::Error;

/// Crate-wide error taxonomy. Every subsystem reports through this enum and
/// propagation is fail-fast: the first error aborts the current statement.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt database format: {0}")]
    CorruptFormat(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("vm error: {0}")]
    Vm(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        DbError::CorruptFormat(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        DbError::OutOfRange(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        DbError::Schema(msg.into())
    }

    pub fn vm(msg: impl Into<String>) -> Self {
        DbError::Vm(msg.into())
    }

    pub fn parse(msg: impl Into<String>, line: u32, column: u32) -> Self {
        DbError::Parse {
            message: msg.into(),
            line,
            column,
        }
    }
}
