//! Machine client error types.

use thiserror::Error;

use examcheck_core::error::DomainError;

/// Errors talking to a worker machine.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The worker was not reachable, even after retrying.
    #[error("cannot reach {url} after {attempts} attempts: {message}")]
    Connection {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The worker answered with a non-success status.
    #[error("{url} answered HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// The worker sent something that is not a session record.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,
}

/// Everything a machine client reports is an interaction failure.
impl From<MachineError> for DomainError {
    fn from(err: MachineError) -> Self {
        DomainError::interaction(err.to_string())
    }
}
