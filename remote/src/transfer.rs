//! Push and pull entry points.
//!
//! Each call owns its connection for exactly one tree copy: it connects, starts one SFTP session,
//! runs the copy and then closes the SFTP session and the connection, whether or not the copy
//! succeeded.

use anyhow::Context;
use tracing::instrument;

use common::copy::{self, Settings, StreamErrors, Summary};
use common::fs::LocalFs;
use common::ignore::IgnoreList;
use common::permission::PermissionRule;

use crate::config::ConnectionParameters;
use crate::session::Connection;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

/// Copies the local `from` tree into the remote `to` directory.
pub async fn push(
    params: &ConnectionParameters,
    from: &str,
    to: &str,
    rules: &mut [PermissionRule],
    ignores: &IgnoreList,
    stream_errors: StreamErrors,
) -> Result<Summary, copy::Error> {
    transfer(Direction::Push, params, from, to, rules, ignores, stream_errors).await
}

/// Copies the remote `from` tree into the local `to` directory.
pub async fn pull(
    params: &ConnectionParameters,
    from: &str,
    to: &str,
    rules: &mut [PermissionRule],
    ignores: &IgnoreList,
    stream_errors: StreamErrors,
) -> Result<Summary, copy::Error> {
    transfer(Direction::Pull, params, from, to, rules, ignores, stream_errors).await
}

/// Copies `from` to `to` in the given direction, streaming through a buffer of
/// `params.buffer_size` bytes.
#[instrument(skip(params, rules, ignores), fields(address = %params.address()))]
pub async fn transfer(
    direction: Direction,
    params: &ConnectionParameters,
    from: &str,
    to: &str,
    rules: &mut [PermissionRule],
    ignores: &IgnoreList,
    stream_errors: StreamErrors,
) -> Result<Summary, copy::Error> {
    let setup_error = |error: anyhow::Error| copy::Error::new(error, Summary::default());
    params.validate().map_err(setup_error)?;
    let connection = Connection::connect(params)
        .await
        .map_err(|error| setup_error(error.into()))?;
    let client = match connection.file_client().await {
        Ok(client) => client,
        Err(error) => {
            if let Err(close_error) = connection.close().await {
                tracing::warn!("{:#}", close_error);
            }
            return Err(setup_error(error.into()));
        }
    };
    let settings = &Settings {
        buffer_size: params.buffer_size,
        stream_errors,
    };
    tracing::info!("starting {} of {:?} to {:?}", direction, from, to);
    let result = match direction {
        Direction::Push => copy::copy(&LocalFs, &client, from, to, rules, ignores, settings).await,
        Direction::Pull => copy::copy(&client, &LocalFs, from, to, rules, ignores, settings).await,
    };
    let released = release(client, connection).await;
    match (result, released) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(summary), Err(error)) => Err(copy::Error::new(error, summary)),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(release_error)) => {
            // the copy failure is what the caller needs to see
            tracing::warn!("{:#}", release_error);
            Err(error)
        }
    }
}

async fn release(client: crate::sftp::FileClient, connection: Connection) -> anyhow::Result<()> {
    let client_closed = client.close().await;
    let connection_closed = connection.close().await;
    client_closed?;
    connection_closed
}

/// Runs a single command on the remote host.
#[instrument(skip(params), fields(address = %params.address()))]
pub async fn exec(
    params: &ConnectionParameters,
    command: &str,
) -> anyhow::Result<crate::session::CommandOutput> {
    params.validate()?;
    let connection = Connection::connect(params).await?;
    let result = connection.run(command).await;
    if let Err(error) = connection.close().await {
        tracing::warn!("{:#}", error);
    }
    result.with_context(|| format!("remote command failed on {}", params.address()))
}
