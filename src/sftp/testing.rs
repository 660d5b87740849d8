//! In-memory doubles for the SFTP client's seams.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::SshError;
use crate::ssh::{CommandResult, CommandRunner};

use super::fs::{RemoteFs, RemoteReader, RemoteWriter};

const MTIME: u32 = 1_700_000_000;

#[derive(Debug, Clone)]
pub enum Node {
    Dir,
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub node: Node,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    unreadable_dirs: HashSet<String>,
    failing_chmod: HashSet<String>,
    failing_reads: HashSet<String>,
    /// Writes fail once a file would grow past this
    write_limit: Option<usize>,
    chmods: Vec<(String, u32)>,
    chowns: Vec<(String, u32, u32)>,
    dirs_read: Vec<String>,
    closed: bool,
}

/// Tree of files kept in a map keyed by absolute path.
#[derive(Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<State>>,
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.insert("/", Node::Dir, 0o755);
        fs
    }

    fn insert(&self, path: &str, node: Node, perm: u32) {
        self.state.lock().entries.insert(
            path.to_string(),
            Entry {
                node,
                mode: perm,
                uid: 1000,
                gid: 1000,
            },
        );
    }

    pub fn add_dir(&self, path: &str) -> &Self {
        self.insert(path, Node::Dir, 0o755);
        self
    }

    pub fn add_file(&self, path: &str, content: &[u8], perm: u32) -> &Self {
        self.insert(path, Node::File(content.to_vec()), perm);
        self
    }

    pub fn add_symlink(&self, path: &str, target: &str) -> &Self {
        self.insert(path, Node::Symlink(target.to_string()), 0o777);
        self
    }

    pub fn set_owner(&self, path: &str, uid: u32, gid: u32) {
        if let Some(entry) = self.state.lock().entries.get_mut(path) {
            entry.uid = uid;
            entry.gid = gid;
        }
    }

    pub fn make_unreadable(&self, path: &str) {
        self.state.lock().unreadable_dirs.insert(path.to_string());
    }

    pub fn fail_chmod_on(&self, path: &str) {
        self.state.lock().failing_chmod.insert(path.to_string());
    }

    pub fn fail_reads_of(&self, path: &str) {
        self.state.lock().failing_reads.insert(path.to_string());
    }

    pub fn limit_writes(&self, limit: usize) {
        self.state.lock().write_limit = Some(limit);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().entries.contains_key(path)
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().entries.get(path).map(|e| e.node.clone()) {
            Some(Node::File(data)) => Some(data),
            _ => None,
        }
    }

    pub fn entry(&self, path: &str) -> Option<Entry> {
        self.state.lock().entries.get(path).cloned()
    }

    pub fn chmods(&self) -> Vec<(String, u32)> {
        self.state.lock().chmods.clone()
    }

    pub fn chowns(&self) -> Vec<(String, u32, u32)> {
        self.state.lock().chowns.clone()
    }

    /// Every directory listed so far, in order
    pub fn dirs_read(&self) -> Vec<String> {
        self.state.lock().dirs_read.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn attrs_of(entry: &Entry) -> FileAttributes {
        let (kind, size) = match &entry.node {
            Node::Dir => (0o040000, 4096),
            Node::File(data) => (0o100000, data.len() as u64),
            Node::Symlink(target) => (0o120000, target.len() as u64),
        };
        FileAttributes {
            size: Some(size),
            uid: Some(entry.uid),
            gid: Some(entry.gid),
            permissions: Some(kind | entry.mode),
            atime: None,
            mtime: Some(MTIME),
            ..Default::default()
        }
    }

    fn require_dir(state: &State, path: &str) -> io::Result<()> {
        match state.entries.get(path).map(|e| &e.node) {
            Some(Node::Dir) => Ok(()),
            Some(_) => Err(io::Error::other(format!("not a directory: {}", path))),
            None => Err(not_found(path)),
        }
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut state = self.state.lock();
        state.dirs_read.push(path.to_string());
        Self::require_dir(&state, path)?;
        if state.unreadable_dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path),
            ));
        }
        Ok(state
            .entries
            .keys()
            .filter(|p| p.as_str() != "/" && p.as_str() != path && parent(p) == path)
            .map(|p| p.rsplit('/').next().unwrap_or("").to_string())
            .collect())
    }

    async fn lstat(&self, path: &str) -> io::Result<FileAttributes> {
        let state = self.state.lock();
        state
            .entries
            .get(path)
            .map(Self::attrs_of)
            .ok_or_else(|| not_found(path))
    }

    async fn stat(&self, path: &str) -> io::Result<FileAttributes> {
        let state = self.state.lock();
        let mut current = path.to_string();
        for _ in 0..8 {
            let entry = state.entries.get(&current).ok_or_else(|| not_found(path))?;
            match &entry.node {
                Node::Symlink(target) => current = target.clone(),
                _ => return Ok(Self::attrs_of(entry)),
            }
        }
        Err(io::Error::other(format!("too many links: {}", path)))
    }

    async fn open_read(&self, path: &str) -> io::Result<RemoteReader> {
        let state = self.state.lock();
        if state.failing_reads.contains(path) {
            return Ok(Box::new(FailingReader));
        }
        match state.entries.get(path).map(|e| &e.node) {
            Some(Node::File(data)) => Ok(Box::new(io::Cursor::new(data.clone()))),
            Some(_) => Err(io::Error::other(format!("not a file: {}", path))),
            None => Err(not_found(path)),
        }
    }

    async fn create(&self, path: &str) -> io::Result<RemoteWriter> {
        {
            let mut state = self.state.lock();
            Self::require_dir(&state, parent(path))?;
            if let Some(Entry { node: Node::Dir, .. }) = state.entries.get(path) {
                return Err(io::Error::other(format!("is a directory: {}", path)));
            }
            state.entries.insert(
                path.to_string(),
                Entry {
                    node: Node::File(Vec::new()),
                    mode: 0o644,
                    uid: 1000,
                    gid: 1000,
                },
            );
        }
        Ok(Box::new(MemoryWriter {
            fs: self.clone(),
            path: path.to_string(),
        }))
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        Self::require_dir(&state, parent(path))?;
        if state.entries.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("exists: {}", path),
            ));
        }
        state.entries.insert(
            path.to_string(),
            Entry {
                node: Node::Dir,
                mode: 0o755,
                uid: 1000,
                gid: 1000,
            },
        );
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        Self::require_dir(&state, path)?;
        if state.entries.keys().any(|p| p != path && parent(p) == path) {
            return Err(io::Error::other(format!("directory not empty: {}", path)));
        }
        state.entries.remove(path);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        let is_dir = state
            .entries
            .get(path)
            .map(|e| matches!(e.node, Node::Dir))
            .ok_or_else(|| not_found(path))?;
        if is_dir {
            return Err(io::Error::other(format!("is a directory: {}", path)));
        }
        state.entries.remove(path);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.entries.contains_key(from) {
            return Err(not_found(from));
        }
        let prefix = format!("{}/", from);
        let moved: Vec<String> = state
            .entries
            .keys()
            .filter(|p| p.as_str() == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = state.entries.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                state.entries.insert(new, entry);
            }
        }
        Ok(())
    }

    async fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        Self::require_dir(&state, parent(link_path))?;
        state.entries.insert(
            link_path.to_string(),
            Entry {
                node: Node::Symlink(target.to_string()),
                mode: 0o777,
                uid: 1000,
                gid: 1000,
            },
        );
        Ok(())
    }

    async fn read_link(&self, path: &str) -> io::Result<String> {
        match self.state.lock().entries.get(path).map(|e| &e.node) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(io::Error::other(format!("not a link: {}", path))),
            None => Err(not_found(path)),
        }
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        if path == "." {
            return Ok("/home/deploy".to_string());
        }
        if self.state.lock().entries.contains_key(path) {
            Ok(path.to_string())
        } else {
            Err(not_found(path))
        }
    }

    async fn set_attrs(&self, path: &str, attrs: FileAttributes) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.failing_chmod.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path),
            ));
        }
        let entry = state.entries.get_mut(path).ok_or_else(|| not_found(path))?;
        if let Some(perm) = attrs.permissions {
            entry.mode = perm & 0o7777;
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            entry.uid = uid;
            entry.gid = gid;
        }
        if let Some(perm) = attrs.permissions {
            state.chmods.push((path.to_string(), perm));
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            state.chowns.push((path.to_string(), uid, gid));
        }
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Appends straight into the file node so partial writes are visible.
struct MemoryWriter {
    fs: MemoryFs,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.fs.state.lock();
        let limit = state.write_limit;
        let result = match state.entries.get_mut(&self.path).map(|e| &mut e.node) {
            Some(Node::File(data)) => {
                if limit.is_some_and(|limit| data.len() + buf.len() > limit) {
                    Err(io::Error::other("no space left on device"))
                } else {
                    data.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
            _ => Err(not_found(&self.path)),
        };
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("connection reset")))
    }
}

/// Answers remote commands from a fixed table; unknown commands exit 1.
#[derive(Default)]
pub struct TableRunner {
    answers: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl TableRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, command: &str, stdout: &str) -> Self {
        self.answers.insert(command.to_string(), stdout.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for TableRunner {
    async fn run(&self, command: &str) -> Result<CommandResult, SshError> {
        self.calls.lock().push(command.to_string());
        Ok(match self.answers.get(command) {
            Some(stdout) => CommandResult {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_code: 0,
            },
            None => CommandResult {
                stdout: String::new(),
                stderr: "no such user or group".to_string(),
                exit_code: 1,
            },
        })
    }
}
