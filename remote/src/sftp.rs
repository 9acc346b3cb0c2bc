//! Remote file system access over SFTP.

use anyhow::{Context, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::{File, Metadata};
use russh_sftp::protocol::StatusCode;

use common::fs::FileSystem;
use common::path;

fn is_not_found(error: &SftpError) -> bool {
    matches!(error, SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

/// [`FileSystem`] on the remote host, backed by one SFTP session.
pub struct FileClient {
    session: SftpSession,
}

impl std::fmt::Debug for FileClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileClient").finish_non_exhaustive()
    }
}

impl FileClient {
    pub fn new(session: SftpSession) -> Self {
        Self { session }
    }

    /// Ends the SFTP session.
    pub async fn close(self) -> anyhow::Result<()> {
        self.session
            .close()
            .await
            .context("failed closing the SFTP session")
    }
}

impl FileSystem for FileClient {
    type Reader = File;
    type Writer = File;

    fn name(&self) -> &'static str {
        "remote"
    }

    async fn is_dir(&self, path: &str) -> anyhow::Result<bool> {
        let metadata = self
            .session
            .metadata(path)
            .await
            .with_context(|| format!("failed reading remote metadata from {path:?}"))?;
        Ok(metadata.is_dir())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        match self.session.metadata(path).await {
            Ok(_) => Ok(true),
            Err(error) if is_not_found(&error) => Ok(false),
            Err(error) => {
                Err(anyhow::Error::new(error).context(format!("failed checking remote {path:?}")))
            }
        }
    }

    async fn list_dir(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let entries = self
            .session
            .read_dir(path)
            .await
            .with_context(|| format!("cannot open remote directory {path:?} for reading"))?;
        Ok(entries
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    async fn create_dir_all(&self, dir: &str) -> anyhow::Result<()> {
        let dir = path::clean(dir);
        let mut current = if dir.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        };
        for part in dir.split('/').filter(|part| !part.is_empty() && *part != ".") {
            current = path::join(&current, part);
            match self.session.metadata(current.as_str()).await {
                Ok(metadata) if metadata.is_dir() => continue,
                Ok(_) => return Err(anyhow!("remote {current:?} exists and is not a directory")),
                Err(error) if is_not_found(&error) => {}
                Err(error) => {
                    return Err(anyhow::Error::new(error)
                        .context(format!("failed checking remote {current:?}")));
                }
            }
            tracing::debug!("creating remote directory {:?}", &current);
            self.session
                .create_dir(current.as_str())
                .await
                .with_context(|| format!("cannot create remote directory {current:?}"))?;
        }
        Ok(())
    }

    async fn open_read(&self, path: &str) -> anyhow::Result<Self::Reader> {
        self.session
            .open(path)
            .await
            .with_context(|| format!("cannot open remote {path:?} for reading"))
    }

    async fn create_write(&self, path: &str) -> anyhow::Result<Self::Writer> {
        self.session
            .create(path)
            .await
            .with_context(|| format!("cannot create remote {path:?}"))
    }

    async fn set_mode(&self, path: &str, mode: u32) -> anyhow::Result<()> {
        let metadata = Metadata {
            permissions: Some(mode),
            ..Metadata::empty()
        };
        self.session
            .set_metadata(path, metadata)
            .await
            .with_context(|| format!("failed setting permissions {mode:o} on remote {path:?}"))
    }
}
