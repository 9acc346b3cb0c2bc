//! SSH connection to the remote host.

use std::sync::Arc;

use russh::keys::ssh_key;
use russh::{ChannelMsg, client};
use tracing::instrument;

use crate::config::{ConnectionParameters, HostKeyPolicy};
use crate::sftp::FileClient;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("timed out after {timeout:?} connecting to {address}")]
    Timeout {
        address: String,
        timeout: std::time::Duration,
    },
    #[error("failed connecting to {address}")]
    Dial {
        address: String,
        #[source]
        source: russh::Error,
    },
    #[error("host key of {address} was rejected")]
    HostKeyRejected { address: String },
    #[error("authentication as {user:?} was rejected by {address}")]
    Authentication { address: String, user: String },
    #[error("SSH session with {address} failed")]
    Session {
        address: String,
        #[source]
        source: russh::Error,
    },
    #[error("failed starting SFTP on {address}")]
    Sftp {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}

struct ClientHandler {
    address: String,
    policy: HostKeyPolicy,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let accepted = self.policy.accepts(&self.address, server_public_key);
        async move { Ok(accepted) }
    }
}

/// Exit status and captured output of a remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_status: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl std::fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.stdout))
    }
}

/// An authenticated SSH connection.
///
/// Channels opened from it (sessions, SFTP clients) must be closed before the connection itself
/// is closed with [`Connection::close`].
pub struct Connection {
    handle: client::Handle<ClientHandler>,
    address: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .finish()
    }
}

impl Connection {
    /// Dials the host, checks its key and authenticates with the password.
    #[instrument(skip(params), fields(address = %params.address(), user = %params.user))]
    pub async fn connect(params: &ConnectionParameters) -> Result<Self, ConnectError> {
        let address = params.address();
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            address: address.clone(),
            policy: params.host_key_policy.clone(),
        };
        tracing::info!("connecting to {}", &address);
        let dial = client::connect(config, (params.host.as_str(), params.port), handler);
        let mut handle = match tokio::time::timeout(params.connect_timeout, dial).await {
            Err(_) => {
                return Err(ConnectError::Timeout {
                    address,
                    timeout: params.connect_timeout,
                });
            }
            Ok(Err(russh::Error::UnknownKey)) => {
                return Err(ConnectError::HostKeyRejected { address });
            }
            Ok(Err(source)) => return Err(ConnectError::Dial { address, source }),
            Ok(Ok(handle)) => handle,
        };
        let auth = handle
            .authenticate_password(params.user.as_str(), params.secret.as_str())
            .await
            .map_err(|source| ConnectError::Session {
                address: address.clone(),
                source,
            })?;
        if !matches!(auth, client::AuthResult::Success) {
            return Err(ConnectError::Authentication {
                address,
                user: params.user.clone(),
            });
        }
        tracing::info!("authenticated to {} as {:?}", &address, &params.user);
        Ok(Self { handle, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Opens a new session channel.
    pub async fn open_session(&self) -> Result<russh::Channel<client::Msg>, ConnectError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|source| ConnectError::Session {
                address: self.address.clone(),
                source,
            })
    }

    /// Starts the `sftp` subsystem on a new session channel.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn file_client(&self) -> Result<FileClient, ConnectError> {
        let channel = self.open_session().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|source| ConnectError::Sftp {
                address: self.address.clone(),
                source: anyhow::Error::new(source).context("failed requesting the sftp subsystem"),
            })?;
        let session = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|source| ConnectError::Sftp {
                address: self.address.clone(),
                source: anyhow::Error::new(source).context("SFTP handshake failed"),
            })?;
        tracing::info!("SFTP session with {} started", &self.address);
        Ok(FileClient::new(session))
    }

    /// Runs `command` on a fresh session channel and collects its output.
    ///
    /// A non-zero exit status is an error carrying whatever the command wrote to stderr.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn run(&self, command: &str) -> anyhow::Result<CommandOutput> {
        let mut channel = self.open_session().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|error| anyhow::anyhow!("failed executing {command:?}: {error}"))?;
        let mut output = CommandOutput::default();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                // extended data type 1 is stderr
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    output.stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }
        if let Err(error) = channel.close().await {
            tracing::warn!("failed closing the channel of {:?}: {}", command, error);
        }
        let Some(status) = exit_status else {
            return Err(anyhow::anyhow!(
                "{command:?} ended without reporting an exit status"
            ));
        };
        output.exit_status = status;
        if status != 0 {
            return Err(anyhow::anyhow!(
                "{:?} exited with status {}: {}",
                command,
                status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            ));
        }
        tracing::debug!("{:?} finished, {} bytes of output", command, output.stdout.len());
        Ok(output)
    }

    /// Disconnects from the host.
    pub async fn close(self) -> anyhow::Result<()> {
        tracing::info!("disconnecting from {}", &self.address);
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|error| anyhow::anyhow!("failed disconnecting from {}: {error}", self.address))
    }
}
