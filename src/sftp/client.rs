//! File operations over SFTP plus a few remote commands for identity lookups.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::{ConnectorConfig, ConnectorKind, Settings, SftpLimits};
use crate::error::SftpError;
use crate::security_log;
use crate::ssh::{CommandRunner, SshConnection};
use crate::validation;

use super::fs::{RemoteFs, RemoteWriter};
use super::types::{DirEntry, EntryType, FileAttrs, SearchResult, join, sort_entries};

fn op_error(operation: &str, path: &str, err: impl std::fmt::Display) -> SftpError {
    SftpError::FileOperation(format!("{} {}: {}", operation, path, err))
}

fn transfer_error(operation: &str, path: &str, err: impl std::fmt::Display) -> SftpError {
    SftpError::Transfer(format!("{} {}: {}", operation, path, err))
}

/// Running byte counters for a copy
struct Progress<'a> {
    copied: u64,
    total: u64,
    report: &'a mut (dyn FnMut(u64, u64) + Send),
}

/// SFTP client bound to one SSH connection.
///
/// Owns the SFTP subsystem handle and the connection it runs on; both are
/// released by [`SftpClient::close`]. Owner and group names are resolved by
/// running `id`/`getent` on the same connection and cached per client.
pub struct SftpClient {
    fs: Box<dyn RemoteFs>,
    runner: Arc<dyn CommandRunner>,
    connection: Option<Arc<SshConnection>>,
    limits: SftpLimits,
    user_names: Mutex<HashMap<u32, String>>,
    group_names: Mutex<HashMap<u32, String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SftpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpClient")
            .field("connection", &self.connection)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl SftpClient {
    /// Dial, authenticate and start the `sftp` subsystem.
    pub async fn open(config: &ConnectorConfig, settings: &Settings) -> Result<Self, SftpError> {
        config
            .validate(ConnectorKind::Ssh)
            .map_err(|e| SftpError::Ssh(e.into()))?;

        let connection = Arc::new(SshConnection::connect(config, &settings.ssh).await?);

        let subsystem = async {
            let channel = connection.open_channel().await?;
            channel.request_subsystem(false, "sftp").await.map_err(|e| {
                SftpError::ConnectionFailed(format!("Failed to request SFTP subsystem: {}", e))
            })?;
            RusshSftpSession::new(channel.into_stream())
                .await
                .map_err(|e| {
                    SftpError::ConnectionFailed(format!("Failed to initialize SFTP session: {}", e))
                })
        };

        let sftp = match timeout(settings.ssh.dial_timeout(), subsystem).await {
            Ok(Ok(sftp)) => sftp,
            Ok(Err(e)) => {
                let _ = connection.disconnect().await;
                return Err(e);
            }
            Err(_) => {
                let _ = connection.disconnect().await;
                return Err(SftpError::ConnectionFailed(format!(
                    "SFTP session setup timed out for {}",
                    config.address()
                )));
            }
        };

        security_log::log_sftp_connect(&config.host, config.port, &config.user);

        let mut client = Self::from_parts(sftp, connection.clone(), settings.sftp);
        client.connection = Some(connection);
        Ok(client)
    }

    /// Build a client from its two seams. `close` then only closes `fs`.
    pub fn from_parts(
        fs: impl RemoteFs + 'static,
        runner: Arc<dyn CommandRunner>,
        limits: SftpLimits,
    ) -> Self {
        Self {
            fs: Box::new(fs),
            runner,
            connection: None,
            limits,
            user_names: Mutex::new(HashMap::new()),
            group_names: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn limits(&self) -> &SftpLimits {
        &self.limits
    }

    /// Close the SFTP channel, then the SSH connection.
    pub async fn close(&self) -> Result<(), SftpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.fs.close().await {
            tracing::debug!("SFTP channel close failed: {}", e);
        }
        if let Some(connection) = &self.connection {
            connection.disconnect().await?;
        }
        Ok(())
    }

    /// Entries of `path`, directories first. Entries that vanish between
    /// the listing and their lstat are left out.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, SftpError> {
        let names = self
            .fs
            .read_dir(path)
            .await
            .map_err(|e| op_error("list", path, e))?;

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let entry_path = join(path, &name);
            match self.fs.lstat(&entry_path).await {
                Ok(attrs) => entries.push(DirEntry::new(name, &attrs)),
                Err(e) => tracing::debug!("Skipping {}: {}", entry_path, e),
            }
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Stream a remote file into `sink`. Returns the bytes copied.
    pub async fn download<W>(&self, path: &str, sink: &mut W) -> Result<u64, SftpError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut remote = self
            .fs
            .open_read(path)
            .await
            .map_err(|e| transfer_error("download", path, e))?;
        tokio::io::copy(&mut remote, sink)
            .await
            .map_err(|e| transfer_error("download", path, e))
    }

    /// Stream `source` into a new remote file, up to the upload cap.
    ///
    /// On overflow or a write error the partial remote file is removed.
    pub async fn upload<R>(&self, path: &str, source: R) -> Result<u64, SftpError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cap = self.limits.upload_max_bytes;
        let mut remote = self
            .fs
            .create(path)
            .await
            .map_err(|e| transfer_error("upload", path, e))?;

        // One byte past the cap is enough to detect overflow
        let mut limited = source.take(cap.saturating_add(1));
        let copied = match tokio::io::copy(&mut limited, &mut remote).await {
            Ok(n) => n,
            Err(e) => {
                self.discard(path, remote).await;
                return Err(transfer_error("upload", path, e));
            }
        };

        if copied > cap {
            self.discard(path, remote).await;
            return Err(SftpError::TooLarge {
                path: path.to_string(),
                limit: cap,
            });
        }

        if let Err(e) = remote.shutdown().await {
            self.discard(path, remote).await;
            return Err(transfer_error("upload", path, e));
        }
        tracing::debug!("Uploaded {} bytes to {}", copied, path);
        Ok(copied)
    }

    /// Drop an in-flight writer and delete what it left behind.
    async fn discard(&self, path: &str, mut writer: RemoteWriter) {
        let _ = writer.shutdown().await;
        drop(writer);
        if let Err(e) = self.fs.remove_file(path).await {
            tracing::warn!("Failed to remove partial file {}: {}", path, e);
        }
    }

    /// Read a UTF-8 text file of at most `max_bytes`.
    pub async fn read_file(&self, path: &str, max_bytes: u64) -> Result<String, SftpError> {
        let attrs = self
            .fs
            .stat(path)
            .await
            .map_err(|e| op_error("read", path, e))?;
        if attrs.size.unwrap_or(0) > max_bytes {
            return Err(SftpError::TooLarge {
                path: path.to_string(),
                limit: max_bytes,
            });
        }

        let remote = self
            .fs
            .open_read(path)
            .await
            .map_err(|e| op_error("read", path, e))?;
        let mut content = Vec::new();
        remote
            .take(max_bytes.saturating_add(1))
            .read_to_end(&mut content)
            .await
            .map_err(|e| transfer_error("read", path, e))?;
        if content.len() as u64 > max_bytes {
            return Err(SftpError::TooLarge {
                path: path.to_string(),
                limit: max_bytes,
            });
        }

        String::from_utf8(content).map_err(|_| SftpError::NotText(path.to_string()))
    }

    /// Replace a remote file with `content`, up to the text write cap.
    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SftpError> {
        let cap = self.limits.write_max_bytes;
        if content.len() as u64 > cap {
            return Err(SftpError::TooLarge {
                path: path.to_string(),
                limit: cap,
            });
        }

        let mut remote = self
            .fs
            .create(path)
            .await
            .map_err(|e| transfer_error("write", path, e))?;
        let written = async {
            remote.write_all(content).await?;
            remote.shutdown().await
        }
        .await;
        if let Err(e) = written {
            self.discard(path, remote).await;
            return Err(transfer_error("write", path, e));
        }
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), SftpError> {
        self.fs
            .mkdir(path)
            .await
            .map_err(|e| op_error("mkdir", path, e))
    }

    /// Create `path` and any missing parents.
    pub async fn mkdir_all(&self, path: &str) -> Result<(), SftpError> {
        let mut current = if path.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = if current.is_empty() {
                component.to_string()
            } else {
                join(&current, component)
            };
            match self.fs.lstat(&current).await {
                Ok(attrs) if EntryType::of(&attrs).is_dir() => continue,
                Ok(_) => {
                    return Err(op_error("mkdir", &current, "exists and is not a directory"));
                }
                Err(_) => self
                    .fs
                    .mkdir(&current)
                    .await
                    .map_err(|e| op_error("mkdir", &current, e))?,
            }
        }
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        self.fs
            .rename(from, to)
            .await
            .map_err(|e| op_error("rename", &format!("{} -> {}", from, to), e))
    }

    /// Remove a file, a symlink (not its target) or a whole directory tree.
    pub async fn delete(&self, path: &str) -> Result<(), SftpError> {
        let attrs = self
            .fs
            .lstat(path)
            .await
            .map_err(|e| op_error("delete", path, e))?;
        match EntryType::of(&attrs) {
            EntryType::Dir => self.remove_tree(path).await,
            EntryType::File | EntryType::Symlink => self
                .fs
                .remove_file(path)
                .await
                .map_err(|e| op_error("delete", path, e)),
        }
    }

    async fn remove_tree(&self, dir: &str) -> Result<(), SftpError> {
        let names = self
            .fs
            .read_dir(dir)
            .await
            .map_err(|e| op_error("delete", dir, e))?;
        for name in names {
            let child = join(dir, &name);
            let attrs = self
                .fs
                .lstat(&child)
                .await
                .map_err(|e| op_error("delete", &child, e))?;
            if EntryType::of(&attrs).is_dir() {
                Box::pin(self.remove_tree(&child)).await?;
            } else {
                self.fs
                    .remove_file(&child)
                    .await
                    .map_err(|e| op_error("delete", &child, e))?;
            }
        }
        self.fs
            .remove_dir(dir)
            .await
            .map_err(|e| op_error("delete", dir, e))
    }

    /// Create `link_path` pointing at `target`.
    pub async fn symlink(&self, target: &str, link_path: &str) -> Result<(), SftpError> {
        self.fs
            .symlink(target, link_path)
            .await
            .map_err(|e| op_error("symlink", link_path, e))
    }

    pub async fn read_link(&self, path: &str) -> Result<String, SftpError> {
        self.fs
            .read_link(path)
            .await
            .map_err(|e| op_error("readlink", path, e))
    }

    /// Absolute form of `path`; `"."` yields the login directory.
    pub async fn realpath(&self, path: &str) -> Result<String, SftpError> {
        self.fs
            .canonicalize(path)
            .await
            .map_err(|e| op_error("realpath", path, e))
    }

    /// Case-insensitive name search below `base`, capped at the search limit.
    ///
    /// Unreadable directories are skipped and symlinked directories are not
    /// followed. Hitting the cap is not an error.
    pub async fn search_files(
        &self,
        base: &str,
        query: &str,
    ) -> Result<Vec<SearchResult>, SftpError> {
        let attrs = self
            .fs
            .lstat(base)
            .await
            .map_err(|e| op_error("search", base, e))?;
        if !EntryType::of(&attrs).is_dir() {
            return Err(op_error("search", base, "not a directory"));
        }

        let needle = query.to_lowercase();
        let mut results = Vec::new();
        self.search_dir(base, &needle, &mut results).await;
        Ok(results)
    }

    async fn search_dir(&self, dir: &str, needle: &str, results: &mut Vec<SearchResult>) {
        let limit = self.limits.search_max_results;
        let names = match self.fs.read_dir(dir).await {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!("Search skipping {}: {}", dir, e);
                return;
            }
        };

        for name in names {
            if results.len() >= limit {
                return;
            }
            let path = join(dir, &name);
            let Ok(attrs) = self.fs.lstat(&path).await else {
                continue;
            };
            let descend = EntryType::of(&attrs).is_dir();
            if name.to_lowercase().contains(needle) {
                results.push(SearchResult::new(path.clone(), name, &attrs));
            }
            if descend && results.len() < limit {
                Box::pin(self.search_dir(&path, needle, results)).await;
            }
        }
    }

    /// Attributes of `path` (not following a final symlink) with owner and
    /// group names. A failed name lookup leaves the name empty.
    pub async fn stat(&self, path: &str) -> Result<FileAttrs, SftpError> {
        let raw = self
            .fs
            .lstat(path)
            .await
            .map_err(|e| op_error("stat", path, e))?;
        let mut attrs = FileAttrs::new(path, &raw);
        if let Some(uid) = raw.uid {
            attrs.owner.name = self.user_name(uid).await;
        }
        if let Some(gid) = raw.gid {
            attrs.group.name = self.group_name(gid).await;
        }
        Ok(attrs)
    }

    async fn user_name(&self, uid: u32) -> String {
        if let Some(name) = self.user_names.lock().get(&uid) {
            return name.clone();
        }
        let name = match self.runner.run(&format!("id -nu {}", uid)).await {
            Ok(result) => result.trimmed_output().map(str::to_string),
            Err(e) => {
                tracing::debug!("id -nu {} failed: {}", uid, e);
                None
            }
        };
        match name {
            Some(name) => {
                self.user_names.lock().insert(uid, name.clone());
                name
            }
            None => String::new(),
        }
    }

    async fn group_name(&self, gid: u32) -> String {
        if let Some(name) = self.group_names.lock().get(&gid) {
            return name.clone();
        }
        let name = match self.runner.run(&format!("getent group {}", gid)).await {
            Ok(result) => result
                .trimmed_output()
                .and_then(|line| getent_field(line, 0))
                .map(str::to_string),
            Err(e) => {
                tracing::debug!("getent group {} failed: {}", gid, e);
                None
            }
        };
        match name {
            Some(name) => {
                self.group_names.lock().insert(gid, name.clone());
                name
            }
            None => String::new(),
        }
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), SftpError> {
        let attrs = FileAttributes {
            permissions: Some(mode & 0o7777),
            ..Default::default()
        };
        self.fs
            .set_attrs(path, attrs)
            .await
            .map_err(|e| op_error("chmod", path, e))
    }

    /// Apply `mode` to `path` and everything below it, root first.
    ///
    /// Stops at the first failure; entries already changed stay changed.
    /// Symlinks are chmod'ed but never descended into. Returns the number
    /// of entries changed.
    pub async fn chmod_recursive(&self, path: &str, mode: u32) -> Result<usize, SftpError> {
        self.chmod(path, mode).await?;
        let attrs = self
            .fs
            .lstat(path)
            .await
            .map_err(|e| op_error("chmod", path, e))?;
        let mut applied = 1;
        if EntryType::of(&attrs).is_dir() {
            self.chmod_tree(path, mode, &mut applied).await?;
        }
        Ok(applied)
    }

    async fn chmod_tree(&self, dir: &str, mode: u32, applied: &mut usize) -> Result<(), SftpError> {
        let names = self
            .fs
            .read_dir(dir)
            .await
            .map_err(|e| op_error("chmod", dir, e))?;
        for name in names {
            let child = join(dir, &name);
            self.chmod(&child, mode).await?;
            *applied += 1;
            let attrs = self
                .fs
                .lstat(&child)
                .await
                .map_err(|e| op_error("chmod", &child, e))?;
            if EntryType::of(&attrs).is_dir() {
                Box::pin(self.chmod_tree(&child, mode, applied)).await?;
            }
        }
        Ok(())
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), SftpError> {
        let attrs = FileAttributes {
            uid: Some(uid),
            gid: Some(gid),
            ..Default::default()
        };
        self.fs
            .set_attrs(path, attrs)
            .await
            .map_err(|e| op_error("chown", path, e))
    }

    /// `chown` by account names. Numeric names are taken as ids.
    pub async fn chown_by_name(
        &self,
        path: &str,
        owner: &str,
        group: &str,
    ) -> Result<(), SftpError> {
        let uid = self.resolve_uid(owner).await?;
        let gid = self.resolve_gid(group).await?;
        self.chown(path, uid, gid).await
    }

    async fn resolve_uid(&self, owner: &str) -> Result<u32, SftpError> {
        if let Ok(uid) = owner.parse::<u32>() {
            return Ok(uid);
        }
        validation::validate_account_name("owner", owner)
            .map_err(|e| SftpError::Identity(e.to_string()))?;
        let result = self.runner.run(&format!("id -u {}", owner)).await?;
        result
            .trimmed_output()
            .and_then(|out| out.parse::<u32>().ok())
            .ok_or_else(|| SftpError::Identity(format!("unknown user '{}'", owner)))
    }

    async fn resolve_gid(&self, group: &str) -> Result<u32, SftpError> {
        if let Ok(gid) = group.parse::<u32>() {
            return Ok(gid);
        }
        validation::validate_account_name("group", group)
            .map_err(|e| SftpError::Identity(e.to_string()))?;
        let result = self.runner.run(&format!("getent group {}", group)).await?;
        result
            .trimmed_output()
            .and_then(|line| getent_field(line, 2))
            .and_then(|gid| gid.parse::<u32>().ok())
            .ok_or_else(|| SftpError::Identity(format!("unknown group '{}'", group)))
    }

    /// Copy a file or directory tree on the remote side.
    ///
    /// `on_progress(copied, total)` runs after every chunk; for a tree both
    /// counters cover all files. A failure mid-file removes that target
    /// file; files already copied stay.
    pub async fn copy<F>(
        &self,
        source: &str,
        target: &str,
        mut on_progress: F,
    ) -> Result<u64, SftpError>
    where
        F: FnMut(u64, u64) + Send,
    {
        // Creating the target would truncate the source
        if source.trim_end_matches('/') == target.trim_end_matches('/') {
            return Err(op_error("copy", target, "source and target are the same path"));
        }

        let attrs = self
            .fs
            .lstat(source)
            .await
            .map_err(|e| op_error("copy", source, e))?;

        let source_prefix = format!("{}/", source.trim_end_matches('/'));
        if EntryType::of(&attrs).is_dir() && target.starts_with(&source_prefix) {
            return Err(op_error("copy", target, "target is inside the source directory"));
        }

        if EntryType::of(&attrs).is_dir() {
            let total = self.tree_size(source).await?;
            let mut progress = Progress {
                copied: 0,
                total,
                report: &mut on_progress,
            };
            self.copy_tree(source, target, &mut progress).await?;
            Ok(progress.copied)
        } else {
            let mut progress = Progress {
                copied: 0,
                total: attrs.size.unwrap_or(0),
                report: &mut on_progress,
            };
            self.copy_file(source, target, &mut progress).await?;
            Ok(progress.copied)
        }
    }

    async fn tree_size(&self, dir: &str) -> Result<u64, SftpError> {
        let names = self
            .fs
            .read_dir(dir)
            .await
            .map_err(|e| op_error("copy", dir, e))?;
        let mut total = 0;
        for name in names {
            let child = join(dir, &name);
            let attrs = self
                .fs
                .lstat(&child)
                .await
                .map_err(|e| op_error("copy", &child, e))?;
            match EntryType::of(&attrs) {
                EntryType::Dir => total += Box::pin(self.tree_size(&child)).await?,
                EntryType::File => total += attrs.size.unwrap_or(0),
                EntryType::Symlink => {}
            }
        }
        Ok(total)
    }

    async fn copy_tree(
        &self,
        source: &str,
        target: &str,
        progress: &mut Progress<'_>,
    ) -> Result<(), SftpError> {
        match self.fs.lstat(target).await {
            Ok(attrs) if EntryType::of(&attrs).is_dir() => {}
            _ => self
                .fs
                .mkdir(target)
                .await
                .map_err(|e| op_error("copy", target, e))?,
        }

        let names = self
            .fs
            .read_dir(source)
            .await
            .map_err(|e| op_error("copy", source, e))?;
        for name in names {
            let from = join(source, &name);
            let to = join(target, &name);
            let attrs = self
                .fs
                .lstat(&from)
                .await
                .map_err(|e| op_error("copy", &from, e))?;
            match EntryType::of(&attrs) {
                EntryType::Dir => Box::pin(self.copy_tree(&from, &to, progress)).await?,
                EntryType::Symlink => {
                    let link_target = self.read_link(&from).await?;
                    self.symlink(&link_target, &to).await?;
                }
                EntryType::File => self.copy_file(&from, &to, progress).await?,
            }
        }
        Ok(())
    }

    async fn copy_file(
        &self,
        source: &str,
        target: &str,
        progress: &mut Progress<'_>,
    ) -> Result<(), SftpError> {
        let mut reader = self
            .fs
            .open_read(source)
            .await
            .map_err(|e| transfer_error("copy", source, e))?;
        let mut writer = self
            .fs
            .create(target)
            .await
            .map_err(|e| transfer_error("copy", target, e))?;

        let mut chunk = vec![0u8; self.limits.copy_chunk_bytes.max(1)];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.discard(target, writer).await;
                    return Err(transfer_error("copy", source, e));
                }
            };
            if let Err(e) = writer.write_all(&chunk[..n]).await {
                self.discard(target, writer).await;
                return Err(transfer_error("copy", target, e));
            }
            progress.copied += n as u64;
            (progress.report)(progress.copied, progress.total);
        }

        if let Err(e) = writer.shutdown().await {
            self.discard(target, writer).await;
            return Err(transfer_error("copy", target, e));
        }
        Ok(())
    }
}

/// Field `index` of a colon-separated getent line
fn getent_field(line: &str, index: usize) -> Option<&str> {
    line.lines()
        .next()
        .and_then(|first| first.split(':').nth(index))
        .filter(|field| !field.is_empty())
}
