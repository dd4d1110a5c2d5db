//! Scripted in-memory transport.
//!
//! [`MockTransport`] stands in for the SSH transport when exercising the
//! registry and the command channel without devices. Each host is backed by a
//! [`MockDevice`] script that echoes commands, prints canned output and a
//! prompt, paginates, lags, or misbehaves on request. Output is delivered in
//! small chunks, the way a real shell trickles it out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::error::ConnectError;
use crate::transport::{Credentials, ShellStream, Transport};

/// Size of the chunks a mock shell emits.
const CHUNK_SIZE: usize = 16;

/// Pagination marker printed between pages.
const MORE_MARKER: &str = " --More-- ";

/// What a Cisco-style shell prints after a space to wipe the marker.
const MORE_ERASE: &str = concat!(
    "\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}",
    "          ",
    "\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}",
);

/// Script for one simulated switch.
#[derive(Debug, Clone)]
pub struct MockDevice {
    prompt: String,
    banner: String,
    responses: HashMap<String, Vec<String>>,
    latency: Duration,
    login_delay: Duration,
    silent: bool,
    refuse_connect: bool,
    reject_shell: bool,
    fail_close: bool,
}

impl MockDevice {
    /// Device that prints `prompt` after every command and knows no commands.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            banner: "\r\nUnauthorized access prohibited\r\n".to_string(),
            responses: HashMap::new(),
            latency: Duration::ZERO,
            login_delay: Duration::ZERO,
            silent: false,
            refuse_connect: false,
            reject_shell: false,
            fail_close: false,
        }
    }

    /// Canned single-page output for `command`. Use `\r\n` between lines.
    pub fn respond(self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.paged(command, vec![output.into()])
    }

    /// Canned output split into pages separated by a `--More--` marker.
    pub fn paged<S: Into<String>>(mut self, command: impl Into<String>, pages: Vec<S>) -> Self {
        self.responses
            .insert(command.into(), pages.into_iter().map(Into::into).collect());
        self
    }

    /// Delay between receiving a line and emitting its output.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay between opening the shell and printing the banner and first prompt.
    pub fn login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    /// Never print the prompt after a command.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Fail every connection attempt.
    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Accept the connection but refuse the interactive shell.
    pub fn reject_shell(mut self) -> Self {
        self.reject_shell = true;
        self
    }

    /// Report an error when the connection is closed (it is torn down anyway).
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    devices: HashMap<String, MockDevice>,
    writes: HashMap<String, Vec<String>>,
    connects: HashMap<String, usize>,
    closes: HashMap<String, usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Link = Arc<Mutex<Option<UnboundedSender<Vec<u8>>>>>;

/// In-memory [`Transport`] driven by [`MockDevice`] scripts.
///
/// Clones share state, so a test can keep a clone to inspect what the
/// registry wrote after handing the transport over.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the script answering for `host`. Unknown hosts are unreachable.
    pub fn with_device(self, host: impl Into<String>, device: MockDevice) -> Self {
        lock(&self.state).devices.insert(host.into(), device);
        self
    }

    /// Every write a session made to `host`, in order, as sent.
    pub fn writes(&self, host: &str) -> Vec<String> {
        lock(&self.state).writes.get(host).cloned().unwrap_or_default()
    }

    pub fn connect_attempts(&self, host: &str) -> usize {
        lock(&self.state).connects.get(host).copied().unwrap_or(0)
    }

    pub fn close_calls(&self, host: &str) -> usize {
        lock(&self.state).closes.get(host).copied().unwrap_or(0)
    }
}

/// Connection to a mock device.
#[derive(Debug)]
pub struct MockHandle {
    host: String,
    link: Link,
}

impl MockHandle {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;
    type Stream = MockShellStream;

    async fn connect(
        &self,
        host: &str,
        _credentials: &Credentials,
    ) -> Result<MockHandle, ConnectError> {
        let mut state = lock(&self.state);
        *state.connects.entry(host.to_string()).or_default() += 1;
        match state.devices.get(host) {
            Some(device) if !device.refuse_connect => Ok(MockHandle {
                host: host.to_string(),
                link: Arc::new(Mutex::new(None)),
            }),
            Some(_) => Err(ConnectError::ConnectionError {
                host: host.to_string(),
                reason: "authentication failed".to_string(),
            }),
            None => Err(ConnectError::ConnectionError {
                host: host.to_string(),
                reason: "no route to host".to_string(),
            }),
        }
    }

    async fn open_interactive_channel(
        &self,
        handle: &MockHandle,
    ) -> Result<MockShellStream, ConnectError> {
        let device = lock(&self.state)
            .devices
            .get(&handle.host)
            .cloned()
            .ok_or(ConnectError::ChannelDisconnectError)?;
        if device.reject_shell {
            return Err(ConnectError::TransportIoError(format!(
                "{} rejected the shell request",
                handle.host
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let greeting = format!("{}{}", device.banner, device.prompt);
        if device.login_delay.is_zero() {
            emit(&tx, &greeting);
        } else {
            emit_later(handle.link.clone(), device.login_delay, greeting);
        }
        *lock(&handle.link) = Some(tx);

        Ok(MockShellStream {
            host: handle.host.clone(),
            device,
            link: handle.link.clone(),
            recv: rx,
            pages: VecDeque::new(),
            state: self.state.clone(),
        })
    }

    async fn close(&self, handle: &MockHandle) -> Result<(), ConnectError> {
        let fail = {
            let mut state = lock(&self.state);
            *state.closes.entry(handle.host.clone()).or_default() += 1;
            state
                .devices
                .get(&handle.host)
                .is_some_and(|device| device.fail_close)
        };
        lock(&handle.link).take();
        if fail {
            return Err(ConnectError::TransportIoError(format!(
                "{} did not acknowledge disconnect",
                handle.host
            )));
        }
        Ok(())
    }
}

fn emit(tx: &UnboundedSender<Vec<u8>>, text: &str) {
    for chunk in text.as_bytes().chunks(CHUNK_SIZE) {
        if tx.send(chunk.to_vec()).is_err() {
            return;
        }
    }
}

/// Emits `text` after `delay` unless the shell has been closed by then.
fn emit_later(link: Link, delay: Duration, text: String) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let tx = lock(&link).clone();
        if let Some(tx) = tx {
            emit(&tx, &text);
        }
    });
}

/// Shell channel of a mock device.
pub struct MockShellStream {
    host: String,
    device: MockDevice,
    link: Link,
    recv: UnboundedReceiver<Vec<u8>>,
    pages: VecDeque<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockShellStream {
    fn page_suffix(&self) -> String {
        if !self.pages.is_empty() {
            format!("\r\n{MORE_MARKER}")
        } else if self.device.silent {
            String::new()
        } else {
            format!("\r\n{}", self.device.prompt)
        }
    }

    fn reply(&mut self, text: &str) -> String {
        if text == " "
            && let Some(page) = self.pages.pop_front()
        {
            return format!("{MORE_ERASE}{page}{}", self.page_suffix());
        }

        let command = text.trim_end_matches(['\r', '\n']);
        let mut reply = format!("{command}\r\n");
        match self.device.responses.get(command) {
            Some(pages) if !pages.is_empty() => {
                self.pages = pages.iter().skip(1).cloned().collect();
                reply.push_str(&pages[0]);
                reply.push_str(&self.page_suffix());
            }
            _ if !self.device.silent => reply.push_str(&self.device.prompt),
            _ => {}
        }
        reply
    }
}

impl ShellStream for MockShellStream {
    async fn write(&mut self, data: &[u8]) -> Result<(), ConnectError> {
        let text = String::from_utf8_lossy(data).into_owned();
        let Some(tx) = lock(&self.link).clone() else {
            return Err(ConnectError::ChannelDisconnectError);
        };
        lock(&self.state)
            .writes
            .entry(self.host.clone())
            .or_default()
            .push(text.clone());

        let reply = self.reply(&text);
        if self.device.latency.is_zero() {
            emit(&tx, &reply);
        } else {
            // The delayed reply must not keep a closed shell alive.
            drop(tx);
            emit_later(self.link.clone(), self.device.latency, reply);
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ConnectError> {
        let mut buffer = Vec::new();
        loop {
            match self.recv.try_recv() {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if buffer.is_empty() => {
                    return Err(ConnectError::ChannelDisconnectError);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(buffer)
    }

    async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        self.recv.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_host_is_unreachable() {
        let transport = MockTransport::new();
        let err = transport
            .connect("ghost", &Credentials::new("admin", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::ConnectionError { .. }));
        assert_eq!(transport.connect_attempts("ghost"), 1);
    }

    #[tokio::test]
    async fn shell_echoes_output_and_prompt() {
        let transport = MockTransport::new()
            .with_device("sw", MockDevice::new("sw#").respond("show clock", "10:00"));
        let handle = transport
            .connect("sw", &Credentials::new("admin", "pw"))
            .await
            .expect("connect");
        let mut stream = transport
            .open_interactive_channel(&handle)
            .await
            .expect("shell");
        let banner = stream.read_available().expect("banner");
        assert!(String::from_utf8_lossy(&banner).ends_with("sw#"));

        stream.write(b"show clock\n").await.expect("write");
        let reply = stream.read_available().expect("reply");
        assert_eq!(String::from_utf8_lossy(&reply), "show clock\r\n10:00\r\nsw#");
        assert_eq!(transport.writes("sw"), vec!["show clock\n"]);
    }

    #[tokio::test]
    async fn close_disconnects_the_stream() {
        let transport = MockTransport::new().with_device("sw", MockDevice::new("sw#"));
        let handle = transport
            .connect("sw", &Credentials::new("admin", "pw"))
            .await
            .expect("connect");
        let mut stream = transport
            .open_interactive_channel(&handle)
            .await
            .expect("shell");
        stream.read_available().expect("banner");

        transport.close(&handle).await.expect("close");
        assert!(matches!(
            stream.write(b"show clock\n").await,
            Err(ConnectError::ChannelDisconnectError)
        ));
        assert!(stream.read_chunk().await.is_none());
        assert_eq!(transport.close_calls("sw"), 1);
    }
}
