use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::anyhow;
use async_recursion::async_recursion;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::fs::FileSystem;
use crate::path;

async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("sftpcp_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn setup_test_dir() -> anyhow::Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    let foo_path = tmp_dir.join("foo");
    tokio::fs::create_dir(&foo_path).await.unwrap();
    tokio::fs::write(foo_path.join("0.txt"), "0").await.unwrap();
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await.unwrap();
    tokio::fs::write(bar_path.join("1.txt"), "1").await.unwrap();
    tokio::fs::write(bar_path.join("2.txt"), "2").await.unwrap();
    tokio::fs::write(bar_path.join("3.txt"), "3").await.unwrap();
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await.unwrap();
    tokio::fs::write(baz_path.join("4.txt"), "4").await.unwrap();
    Ok(tmp_dir)
}

#[async_recursion]
pub async fn check_dirs_identical(
    src: &std::path::Path,
    dst: &std::path::Path,
) -> anyhow::Result<()> {
    use anyhow::Context;
    let mut src_entries = tokio::fs::read_dir(src).await?;
    while let Some(src_entry) = src_entries.next_entry().await? {
        let src_entry_path = src_entry.path();
        let src_entry_name = src_entry_path.file_name().unwrap();
        let dst_entry_path = dst.join(src_entry_name);
        let src_md = tokio::fs::metadata(&src_entry_path)
            .await
            .context(format!("Source file {:?} is missing!", &src_entry_path))?;
        let dst_md = tokio::fs::metadata(&dst_entry_path).await.context(format!(
            "Destination file {:?} is missing!",
            &dst_entry_path
        ))?;
        assert_eq!(src_md.is_file(), dst_md.is_file());
        if src_md.is_file() {
            let src_contents = tokio::fs::read(&src_entry_path).await?;
            let dst_contents = tokio::fs::read(&dst_entry_path).await?;
            assert_eq!(src_contents, dst_contents, "{:?} differs", &dst_entry_path);
        } else {
            check_dirs_identical(&src_entry_path, &dst_entry_path).await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File { data: Vec<u8>, mode: Option<u32> },
}

static ROOT: Node = Node::Dir;

#[derive(Debug, Default)]
struct MemState {
    nodes: BTreeMap<String, Node>,
    ops: Vec<String>,
    fail_read_after: HashMap<String, usize>,
    fail_write_after: HashMap<String, usize>,
    fail_close: HashSet<String>,
    fail_chmod: HashSet<String>,
    fail_stat: HashSet<String>,
}

impl MemState {
    fn stat(&self, path: &str) -> std::io::Result<Option<&Node>> {
        if self.fail_stat.contains(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("injected stat failure on {path}"),
            ));
        }
        if path == "/" {
            return Ok(Some(&ROOT));
        }
        Ok(self.nodes.get(path))
    }
}

/// In-memory [`FileSystem`] with failure injection and a log of every mutating operation.
///
/// Paths are absolute and compared after [`path::clean`]. The root directory always exists and
/// directory listings come back sorted by name.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    state: Arc<Mutex<MemState>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, dir: &str) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(path::clean(dir), Node::Dir);
    }

    pub fn add_file(&self, file: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(
            path::clean(file),
            Node::File {
                data: data.to_vec(),
                mode: None,
            },
        );
    }

    /// Reads of `file` return an error once `bytes` bytes were handed out.
    pub fn fail_read_after(&self, file: &str, bytes: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_read_after.insert(path::clean(file), bytes);
    }

    /// The first write to `file` made once it holds `bytes` bytes fails. Later writes succeed.
    pub fn fail_write_after(&self, file: &str, bytes: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_write_after.insert(path::clean(file), bytes);
    }

    /// Closing a writer of `file` fails.
    pub fn fail_close(&self, file: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_close.insert(path::clean(file));
    }

    pub fn fail_chmod(&self, file: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_chmod.insert(path::clean(file));
    }

    pub fn fail_stat(&self, file: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_stat.insert(path::clean(file));
    }

    pub fn has(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.nodes.contains_key(&path::clean(path))
    }

    pub fn is_dir_node(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        matches!(state.nodes.get(&path::clean(path)), Some(Node::Dir))
    }

    pub fn contents(&self, file: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        match state.nodes.get(&path::clean(file)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn mode(&self, file: &str) -> Option<u32> {
        let state = self.state.lock().unwrap();
        match state.nodes.get(&path::clean(file)) {
            Some(Node::File { mode, .. }) => *mode,
            _ => None,
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }
}

pub struct MemReader {
    data: Vec<u8>,
    pos: usize,
    fail_after: Option<usize>,
}

impl AsyncRead for MemReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let limit = match self.fail_after {
            Some(fail_after) if fail_after < self.data.len() => {
                if self.pos >= fail_after {
                    return Poll::Ready(Err(std::io::Error::other("injected read failure")));
                }
                fail_after
            }
            _ => self.data.len(),
        };
        let n = buf.remaining().min(limit - self.pos);
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

pub struct MemWriter {
    path: String,
    state: Arc<Mutex<MemState>>,
    fail_after: Option<usize>,
    accepted: usize,
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if matches!(self.fail_after, Some(limit) if self.accepted >= limit) {
            self.fail_after = None;
            return Poll::Ready(Err(std::io::Error::other("injected write failure")));
        }
        let this = &mut *self;
        let mut state = this.state.lock().unwrap();
        match state.nodes.get_mut(&this.path) {
            Some(Node::File { data, .. }) => {
                data.extend_from_slice(buf);
                this.accepted += buf.len();
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(std::io::Error::other(format!(
                "{} is no longer a file",
                this.path
            )))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_close.contains(&self.path) {
            return Poll::Ready(Err(std::io::Error::other("injected close failure")));
        }
        let op = format!("close {}", self.path);
        state.ops.push(op);
        Poll::Ready(Ok(()))
    }
}

impl FileSystem for MemFs {
    type Reader = MemReader;
    type Writer = MemWriter;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn is_dir(&self, path: &str) -> anyhow::Result<bool> {
        let state = self.state.lock().unwrap();
        match state.stat(&path::clean(path))? {
            Some(node) => Ok(matches!(node, Node::Dir)),
            None => Err(anyhow!("{path:?}: no such file or directory")),
        }
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.stat(&path::clean(path))?.is_some())
    }

    async fn list_dir(&self, dir: &str) -> anyhow::Result<Vec<String>> {
        let dir = path::clean(dir);
        let state = self.state.lock().unwrap();
        match state.stat(&dir)? {
            Some(Node::Dir) => {}
            Some(_) => return Err(anyhow!("{dir:?}: not a directory")),
            None => return Err(anyhow!("{dir:?}: no such file or directory")),
        }
        Ok(state
            .nodes
            .keys()
            .filter(|key| *key != "/" && path::parent(key) == dir)
            .map(|key| path::base(key))
            .collect())
    }

    async fn create_dir_all(&self, dir: &str) -> anyhow::Result<()> {
        let dir = path::clean(dir);
        let mut state = self.state.lock().unwrap();
        let mut current = String::new();
        for part in dir.split('/').filter(|part| !part.is_empty()) {
            current = format!("{current}/{part}");
            match state.nodes.get(&current) {
                Some(Node::Dir) => {}
                Some(_) => return Err(anyhow!("{current:?}: not a directory")),
                None => {
                    state.nodes.insert(current.clone(), Node::Dir);
                    state.ops.push(format!("mkdir {current}"));
                }
            }
        }
        Ok(())
    }

    async fn open_read(&self, file: &str) -> anyhow::Result<Self::Reader> {
        let file = path::clean(file);
        let state = self.state.lock().unwrap();
        match state.stat(&file)? {
            Some(Node::File { data, .. }) => Ok(MemReader {
                data: data.clone(),
                pos: 0,
                fail_after: state.fail_read_after.get(&file).copied(),
            }),
            Some(Node::Dir) => Err(anyhow!("{file:?}: is a directory")),
            None => Err(anyhow!("{file:?}: no such file or directory")),
        }
    }

    async fn create_write(&self, file: &str) -> anyhow::Result<Self::Writer> {
        let file = path::clean(file);
        let mut state = self.state.lock().unwrap();
        match state.stat(&path::parent(&file))? {
            Some(Node::Dir) => {}
            _ => return Err(anyhow!("cannot create {file:?}: parent is not a directory")),
        }
        if let Some(Node::Dir) = state.nodes.get(&file) {
            return Err(anyhow!("cannot create {file:?}: is a directory"));
        }
        // truncate, keeping the mode of an existing file
        let mode = match state.nodes.get(&file) {
            Some(Node::File { mode, .. }) => *mode,
            _ => None,
        };
        state.nodes.insert(
            file.clone(),
            Node::File {
                data: vec![],
                mode,
            },
        );
        state.ops.push(format!("create {file}"));
        let fail_after = state.fail_write_after.get(&file).copied();
        Ok(MemWriter {
            path: file,
            state: self.state.clone(),
            fail_after,
            accepted: 0,
        })
    }

    async fn set_mode(&self, file: &str, new_mode: u32) -> anyhow::Result<()> {
        let file = path::clean(file);
        let mut state = self.state.lock().unwrap();
        if state.fail_chmod.contains(&file) {
            return Err(anyhow!("{file:?}: injected chmod failure"));
        }
        match state.nodes.get_mut(&file) {
            Some(Node::File { mode, .. }) => *mode = Some(new_mode),
            _ => return Err(anyhow!("{file:?}: no such file")),
        }
        state.ops.push(format!("chmod {file} {new_mode:o}"));
        Ok(())
    }
}
