//! Error types for labgate
//!
//! Each layer owns a focused error enum (`Rejection` in the validator,
//! `RuntimeError` in the container runtime, `ExecError` in the executor).
//! `GateError` is the crate-wide umbrella used where those layers meet.

use thiserror::Error;

pub use crate::executor::ExecError;
pub use crate::runtime::RuntimeError;
pub use crate::security::Rejection;

/// The primary error type for labgate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors (invalid values, unreadable files, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command validator refused a request
    #[error("Command rejected: {0}")]
    Validation(#[from] Rejection),

    /// A command could not be started or did not finish successfully
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Container runtime failures (daemon unreachable, CLI errors, etc.)
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Malformed client messages or broken connections
    #[error("Transport error: {0}")]
    Transport(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for labgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
