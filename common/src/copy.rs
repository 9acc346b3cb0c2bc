use anyhow::{Context, anyhow};
use async_recursion::async_recursion;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::fs::FileSystem;
use crate::ignore::IgnoreList;
use crate::path;
use crate::permission::{self, PermissionRule};

/// Default size of the buffer used to stream file contents.
pub const DEFAULT_BUFFER_SIZE: usize = 10240;

/// Error type for copy operations that preserves operation summary even on failure.
///
/// # Logging Convention
/// The Display implementation automatically shows the full error chain, so you can log it
/// with any format specifier:
/// ```ignore
/// tracing::error!("operation failed: {}", &error);   // ✅ Shows full chain
/// tracing::error!("operation failed: {:#}", &error); // ✅ Shows full chain
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

/// What to do when reading the source or writing the destination fails mid-stream.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum StreamErrors {
    /// A failed read ends the file as if end-of-file was reached and a failed write is skipped.
    /// Both are logged but the copy carries on, possibly leaving a truncated file behind.
    #[default]
    Tolerant,
    /// Read and write failures fail the copy.
    Strict,
}

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    pub buffer_size: usize,
    pub stream_errors: StreamErrors,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            stream_errors: StreamErrors::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub directories_created: usize,
    pub permissions_applied: usize,
    pub entries_ignored: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            directories_created: self.directories_created + other.directories_created,
            permissions_applied: self.permissions_applied + other.permissions_applied,
            entries_ignored: self.entries_ignored + other.entries_ignored,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            directories created: {}\n\
            permissions applied: {}\n\
            entries ignored: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.directories_created,
            self.permissions_applied,
            self.entries_ignored,
        )
    }
}

/// Streams `reader` into `writer` through a buffer of `buffer_size` bytes and closes the writer.
/// Returns the number of bytes written.
async fn stream<R, W>(reader: &mut R, writer: &mut W, settings: &Settings) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut buffer = vec![0u8; settings.buffer_size];
    let mut written = 0u64;
    let mut read = 0u64;
    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(n) => n,
            Err(error) => match settings.stream_errors {
                StreamErrors::Strict => {
                    return Err(error).context(format!("failed reading source after {read} bytes"));
                }
                StreamErrors::Tolerant => {
                    tracing::warn!(
                        "read failed after {} bytes, treating it as end of file: {}",
                        read,
                        &error
                    );
                    0
                }
            },
        };
        if n == 0 {
            break;
        }
        read += n as u64;
        match writer.write_all(&buffer[..n]).await {
            Ok(()) => written += n as u64,
            Err(error) => match settings.stream_errors {
                StreamErrors::Strict => {
                    return Err(error)
                        .context(format!("failed writing destination after {written} bytes"));
                }
                StreamErrors::Tolerant => {
                    tracing::warn!("write of {} bytes failed, skipping: {}", n, &error);
                }
            },
        }
    }
    if let Err(error) = writer.shutdown().await {
        match settings.stream_errors {
            StreamErrors::Strict => return Err(error).context("failed closing destination"),
            StreamErrors::Tolerant => tracing::warn!("failed closing destination: {}", &error),
        }
    }
    Ok(written)
}

/// Makes sure `dir` exists on `fs`, creating it (and any missing parents) when it doesn't.
async fn ensure_dir<D: FileSystem + Sync>(fs: &D, dir: &str) -> anyhow::Result<Summary> {
    if fs.exists(dir).await? {
        return Ok(Summary::default());
    }
    tracing::debug!("creating {} directory {:?}", fs.name(), dir);
    fs.create_dir_all(dir).await?;
    Ok(Summary {
        directories_created: 1,
        ..Default::default()
    })
}

/// Copies the single file `from` to exactly `to`, then applies the permission rule matching `to`.
#[instrument(skip(src, dst, rules, settings))]
pub async fn copy_file<S, D>(
    src: &S,
    dst: &D,
    from: &str,
    to: &str,
    rules: &mut [PermissionRule],
    settings: &Settings,
) -> Result<Summary, Error>
where
    S: FileSystem + Sync,
    D: FileSystem + Sync,
{
    let mut copy_summary = ensure_dir(dst, &path::parent(to))
        .await
        .with_context(|| format!("failed preparing parent directory of {to:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    tracing::debug!("opening 'from' for reading and 'to' for writing");
    let mut reader = src
        .open_read(from)
        .await
        .map_err(|err| Error::new(err, copy_summary))?;
    let mut writer = dst
        .create_write(to)
        .await
        .map_err(|err| Error::new(err, copy_summary))?;
    tracing::debug!("copying data");
    let bytes = stream(&mut reader, &mut writer, settings)
        .await
        .with_context(|| format!("failed copying {from:?} to {to:?}"))
        .map_err(|err| Error::new(err, copy_summary))?;
    drop(writer);
    if let Some(rule) = permission::find_rule(rules, to) {
        tracing::debug!("applying permission rule");
        permission::apply(dst, to, rule)
            .await
            .map_err(|err| Error::new(err, copy_summary))?;
        copy_summary.permissions_applied += 1;
    }
    // we mark files as "copied" only after the permissions are set as well
    copy_summary.bytes_copied += bytes;
    copy_summary.files_copied += 1;
    Ok(copy_summary)
}

#[instrument(skip(src, dst, rules, ignores, settings))]
#[async_recursion]
async fn copy_dir<S, D>(
    src: &S,
    dst: &D,
    from: &str,
    to: &str,
    rules: &mut [PermissionRule],
    ignores: &IgnoreList,
    settings: &Settings,
) -> Result<Summary, Error>
where
    S: FileSystem + Sync,
    D: FileSystem + Sync,
{
    let mut copy_summary = ensure_dir(dst, to)
        .await
        .map_err(|err| Error::new(err, Default::default()))?;
    tracing::debug!("process contents of 'from' directory");
    let names = src
        .list_dir(from)
        .await
        .map_err(|err| Error::new(err, copy_summary))?;
    for name in names {
        let entry_from = path::join(from, &name);
        let entry_to = path::join(to, &name);
        if ignores.is_ignored(&entry_from) {
            tracing::debug!("skipping ignored {:?}", &entry_from);
            copy_summary.entries_ignored += 1;
            continue;
        }
        let is_dir = src
            .is_dir(&entry_from)
            .await
            .map_err(|err| Error::new(err, copy_summary))?;
        let result = if is_dir {
            copy_dir(src, dst, &entry_from, &entry_to, rules, ignores, settings).await
        } else {
            copy_file(src, dst, &entry_from, &entry_to, rules, settings).await
        };
        match result {
            Ok(summary) => copy_summary = copy_summary + summary,
            Err(error) => {
                return Err(Error::new(error.source, copy_summary + error.summary));
            }
        }
    }
    Ok(copy_summary)
}

/// Copies `from` (a file or a directory tree on `src`) into the directory `to` on `dst`.
///
/// - If `from` is on the ignore list nothing happens and the call succeeds.
/// - A directory's contents are copied depth-first into `to`, creating `to` and every
///   subdirectory on the way. Entries whose source path is on the ignore list are skipped.
/// - A single file lands at `to/<basename of from>`.
/// - Every copied file whose destination path matches a permission rule gets that rule applied
///   once its contents are fully written.
///
/// The walk is strictly sequential and stops at the first error; nothing already copied is
/// rolled back. The same `src` and `dst` handles are used for the whole walk.
#[instrument(skip(src, dst, rules, ignores, settings))]
pub async fn copy<S, D>(
    src: &S,
    dst: &D,
    from: &str,
    to: &str,
    rules: &mut [PermissionRule],
    ignores: &IgnoreList,
    settings: &Settings,
) -> Result<Summary, Error>
where
    S: FileSystem + Sync,
    D: FileSystem + Sync,
{
    if settings.buffer_size == 0 {
        return Err(Error::new(
            anyhow!("buffer size must be greater than zero"),
            Default::default(),
        ));
    }
    if ignores.is_ignored(from) {
        tracing::info!("{:?} is on the ignore list, nothing to do", from);
        return Ok(Summary {
            entries_ignored: 1,
            ..Default::default()
        });
    }
    tracing::debug!("reading {} metadata", src.name());
    let is_dir = src
        .is_dir(from)
        .await
        .map_err(|err| Error::new(err, Default::default()))?;
    if is_dir {
        copy_dir(src, dst, from, to, rules, ignores, settings).await
    } else {
        let file_to = path::join(to, &path::base(from));
        copy_file(src, dst, from, &file_to, rules, settings).await
    }
}
