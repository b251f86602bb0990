// src/error.rs
//! Error types for the activity recorder

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A user command was issued from a state that does not accept it.
    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for RecorderError {
    fn from(error: anyhow::Error) -> Self {
        RecorderError::Other(error.to_string())
    }
}
