//! Error types for session management and command execution.
//!
//! Every failure that concerns a single host or a single session is reported
//! through [`ConnectError`] inside a batch report, so one bad device never
//! aborts work on the others.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while creating sessions or running commands on them.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The transport could not be established for a host.
    ///
    /// Raised at session creation time, including credential rejection.
    #[error("connection to {host} failed: {reason}")]
    ConnectionError { host: String, reason: String },

    /// A read or write on an established shell channel failed.
    #[error("transport io error: {0}")]
    TransportIoError(String),

    /// The shell channel was disconnected while waiting for output.
    ///
    /// This typically happens when the remote device or the transport closes
    /// the connection while a command is in flight.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The session has been closed and removed from the registry.
    #[error("session closed")]
    ConnectClosedError,

    /// No recognised prompt arrived before the timeout elapsed.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// A prompt or pagination pattern failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// No built-in device profile exists under the given name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to hand bytes to the shell I/O task.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<Vec<u8>>),

    /// Unexpected internal failure (poisoned lock, encoding error, lost task).
    #[error("internal error: {0}")]
    InternalServerError(String),
}

impl ConnectError {
    /// Returns true for errors raised by the prompt-match timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::ExecTimeout(_))
    }

    /// Returns true for errors caused by a broken or closed channel.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ConnectError::TransportIoError(_)
                | ConnectError::ChannelDisconnectError
                | ConnectError::ConnectClosedError
                | ConnectError::SendDataError(_)
                | ConnectError::RusshError(_)
                | ConnectError::Ssh2Error(_)
        )
    }
}
