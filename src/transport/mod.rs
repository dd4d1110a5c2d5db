//! Transport boundary.
//!
//! The core never speaks SSH directly. It depends on two contracts:
//!
//! - [`Transport`] establishes and tears down connections and opens the
//!   interactive shell channel bound to one connection.
//! - [`ShellStream`] is that channel: a raw byte pipe with no framing, whose
//!   reads return whatever a human at a terminal would have seen.
//!
//! [`SshTransport`] implements both over `async-ssh2-tokio`. The scripted
//! [`MockTransport`](crate::mock::MockTransport) implements them in memory.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::ConnectError;

pub use options::{SecurityLevel, SshOptions};
pub use ssh::{SshHandle, SshShellStream, SshTransport};

/// Login material handed to the transport for every host of a batch.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    config::DEFAULT_SSH_PORT
}

impl Credentials {
    /// Password credentials on the default SSH port.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            port: config::DEFAULT_SSH_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Bidirectional byte channel emulating a terminal session.
///
/// Implementations are owned by exactly one session worker, so methods take
/// `&mut self` and never need internal locking.
pub trait ShellStream: Send + 'static {
    /// Writes raw bytes to the remote shell.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Returns every byte that has already arrived, without waiting.
    ///
    /// An empty vector means nothing is buffered. Fails only when the channel
    /// is gone and nothing was left to read.
    fn read_available(&mut self) -> Result<Vec<u8>, ConnectError>;

    /// Waits for the next chunk of output. `None` once the channel has closed.
    fn read_chunk(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

/// Secure-transport collaborator: connection establishment and teardown.
pub trait Transport: Send + Sync + 'static {
    /// Established connection, exclusively owned by one session.
    type Handle: Send + Sync + 'static;
    /// Interactive channel opened on a [`Transport::Handle`].
    type Stream: ShellStream;

    fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Handle, ConnectError>> + Send;

    fn open_interactive_channel(
        &self,
        handle: &Self::Handle,
    ) -> impl Future<Output = Result<Self::Stream, ConnectError>> + Send;

    fn close(&self, handle: &Self::Handle) -> impl Future<Output = Result<(), ConnectError>> + Send;
}

mod options;
mod ssh;

#[cfg(test)]
mod tests {
    use super::Credentials;

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2").with_port(2222);
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(rendered.contains("2222"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn credentials_port_defaults_when_missing() {
        let creds: Credentials =
            serde_json::from_str(r#"{"username":"ops","password":"pw"}"#).expect("decode");
        assert_eq!(creds.port, 22);
    }
}
