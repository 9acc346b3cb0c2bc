//! File system capability used by the copy engine.
//!
//! The engine only ever needs a handful of operations on either side of a copy. [`FileSystem`]
//! captures exactly those so the same traversal runs local→remote and remote→local.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncRead, AsyncWrite};

/// Mode used for directories created on the local host (subject to umask).
pub const DIR_MODE: u32 = 0o755;

pub trait FileSystem {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    /// Short label used in log messages, e.g. "local" or "remote".
    fn name(&self) -> &'static str;

    /// Stats `path`. A missing path is an error like any other stat failure.
    fn is_dir(&self, path: &str) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// `Ok(false)` only when the path is reported as not found, every other stat failure is an
    /// error.
    fn exists(&self, path: &str) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Entry names of a directory in the order the listing returns them, without `.` and `..`.
    fn list_dir(&self, path: &str) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send;

    fn create_dir_all(&self, path: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn open_read(&self, path: &str) -> impl Future<Output = anyhow::Result<Self::Reader>> + Send;

    /// Creates `path` for writing, truncating an existing file.
    fn create_write(&self, path: &str)
    -> impl Future<Output = anyhow::Result<Self::Writer>> + Send;

    fn set_mode(&self, path: &str, mode: u32) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// The local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    type Reader = tokio::fs::File;
    type Writer = tokio::fs::File;

    fn name(&self) -> &'static str {
        "local"
    }

    async fn is_dir(&self, path: &str) -> anyhow::Result<bool> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed reading metadata from {path:?}"))?;
        Ok(metadata.is_dir())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => {
                Err(anyhow::Error::new(error).context(format!("failed checking {path:?}")))
            }
        }
    }

    async fn list_dir(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("cannot open directory {path:?} for reading"))?;
        let mut names = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed traversing directory {path:?}"))?
        {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| anyhow!("file name {name:?} in {path:?} is not valid UTF-8"))?;
            names.push(name);
        }
        Ok(names)
    }

    async fn create_dir_all(&self, path: &str) -> anyhow::Result<()> {
        tokio::fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(path)
            .await
            .with_context(|| format!("cannot create directory {path:?}"))
    }

    async fn open_read(&self, path: &str) -> anyhow::Result<Self::Reader> {
        tokio::fs::File::open(path)
            .await
            .with_context(|| format!("cannot open {path:?} for reading"))
    }

    async fn create_write(&self, path: &str) -> anyhow::Result<Self::Writer> {
        tokio::fs::File::create(path)
            .await
            .with_context(|| format!("cannot create {path:?}"))
    }

    async fn set_mode(&self, path: &str, mode: u32) -> anyhow::Result<()> {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .with_context(|| format!("failed setting mode {mode:#o} on {path:?}"))
    }
}
