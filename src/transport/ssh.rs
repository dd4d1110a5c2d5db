use super::*;

use async_ssh2_tokio::client::{AuthMethod, Client};
use log::{debug, trace};
use russh::ChannelMsg;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TryRecvError};

/// SSH transport backed by `async-ssh2-tokio`.
///
/// Each connection gets one PTY shell channel. A background task pumps bytes
/// between that channel and a pair of queues, so the session worker only ever
/// sees a [`SshShellStream`].
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Transport with default options at the given security level.
    pub fn with_level(level: SecurityLevel) -> Self {
        Self::new(SshOptions::new(level))
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

/// Established SSH connection plus the label used in log records.
pub struct SshHandle {
    client: Client,
    device_addr: String,
}

impl SshHandle {
    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    /// Checks if the underlying SSH connection is still active.
    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }
}

impl Transport for SshTransport {
    type Handle = SshHandle;
    type Stream = SshShellStream;

    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<SshHandle, ConnectError> {
        let device_addr = format!("{}@{}:{}", credentials.username, host, credentials.port);
        debug!("{} Connecting at {:?} level", device_addr, self.options.level);

        let client = Client::connect_with_config(
            (host.to_string(), credentials.port),
            &credentials.username,
            AuthMethod::with_password(&credentials.password),
            self.options.server_check.clone(),
            self.options.client_config(),
        )
        .await
        .map_err(|e| ConnectError::ConnectionError {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        debug!("{} TCP connection successful", device_addr);
        Ok(SshHandle {
            client,
            device_addr,
        })
    }

    async fn open_interactive_channel(
        &self,
        handle: &SshHandle,
    ) -> Result<SshShellStream, ConnectError> {
        let device_addr = handle.device_addr.clone();

        let mut channel = handle.client.get_channel().await?;
        channel
            .request_pty(false, config::PTY_TERM, 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) =
            mpsc::channel::<Vec<u8>>(config::SHELL_BUFFER_DEPTH);
        let (sender_to_user, receiver_from_shell) =
            mpsc::channel::<Vec<u8>>(config::SHELL_BUFFER_DEPTH);

        let addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = receiver_from_user.recv() => {
                        let Some(data) = outgoing else {
                            debug!("{} Session dropped its shell writer.", addr);
                            let _ = channel.eof().await;
                            break;
                        };
                        if let Err(e) = channel.data(&data[..]).await {
                            debug!("{} Failed to send data to shell: {:?}", addr, e);
                            break;
                        }
                    },
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { ref data })
                            | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                                trace!("{} <- {:?}", addr, String::from_utf8_lossy(data));
                                if sender_to_user.send(data.to_vec()).await.is_err() {
                                    debug!("{} Shell output receiver dropped.", addr);
                                    break;
                                }
                            }
                            Some(ChannelMsg::ExitStatus { exit_status }) => {
                                debug!("{} Shell exited with status {}", addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            Some(ChannelMsg::Eof) | None => {
                                debug!("{} Shell sent EOF.", addr);
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended.", addr);
        });

        Ok(SshShellStream {
            device_addr,
            sender: sender_to_shell,
            recv: receiver_from_shell,
        })
    }

    async fn close(&self, handle: &SshHandle) -> Result<(), ConnectError> {
        debug!("Closing SSH connection to {}", handle.device_addr);
        if !handle.is_connected() {
            debug!("Connection {} already disconnected, skipping", handle.device_addr);
            return Ok(());
        }
        handle.client.disconnect().await?;
        Ok(())
    }
}

/// Shell channel of one SSH connection.
pub struct SshShellStream {
    device_addr: String,
    sender: Sender<Vec<u8>>,
    recv: Receiver<Vec<u8>>,
}

impl ShellStream for SshShellStream {
    async fn write(&mut self, data: &[u8]) -> Result<(), ConnectError> {
        trace!("{} -> {:?}", self.device_addr, String::from_utf8_lossy(data));
        self.sender.send(data.to_vec()).await?;
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
