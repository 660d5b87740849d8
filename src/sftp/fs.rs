use std::io;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpProtocolError;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Filesystem primitives the SFTP client is built on.
///
/// Paths are remote, `/`-separated strings. Errors carry the server's
/// message; a missing path maps to [`io::ErrorKind::NotFound`].
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Entry names in `path`, without `.` and `..`
    async fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;
    async fn lstat(&self, path: &str) -> io::Result<FileAttributes>;
    async fn stat(&self, path: &str) -> io::Result<FileAttributes>;
    async fn open_read(&self, path: &str) -> io::Result<RemoteReader>;
    /// Create or truncate `path` for writing
    async fn create(&self, path: &str) -> io::Result<RemoteWriter>;
    async fn mkdir(&self, path: &str) -> io::Result<()>;
    async fn remove_dir(&self, path: &str) -> io::Result<()>;
    async fn remove_file(&self, path: &str) -> io::Result<()>;
    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;
    async fn symlink(&self, target: &str, link_path: &str) -> io::Result<()>;
    async fn read_link(&self, path: &str) -> io::Result<String>;
    async fn canonicalize(&self, path: &str) -> io::Result<String>;
    /// Apply only the fields set in `attrs`
    async fn set_attrs(&self, path: &str, attrs: FileAttributes) -> io::Result<()>;
    async fn close(&self) -> io::Result<()>;
}

fn to_io(err: SftpProtocolError) -> io::Error {
    let kind = match &err {
        SftpProtocolError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => io::ErrorKind::NotFound,
            StatusCode::PermissionDenied => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        },
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.to_string())
}

#[async_trait]
impl RemoteFs for SftpSession {
    async fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let entries = SftpSession::read_dir(self, path).await.map_err(to_io)?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    async fn lstat(&self, path: &str) -> io::Result<FileAttributes> {
        self.symlink_metadata(path).await.map_err(to_io)
    }

    async fn stat(&self, path: &str) -> io::Result<FileAttributes> {
        self.metadata(path).await.map_err(to_io)
    }

    async fn open_read(&self, path: &str) -> io::Result<RemoteReader> {
        let file = self.open(path).await.map_err(to_io)?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> io::Result<RemoteWriter> {
        let file = self
            .open_with_flags(
                path,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            )
            .await
            .map_err(to_io)?;
        Ok(Box::new(file))
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        self.create_dir(path).await.map_err(to_io)
    }

    async fn remove_dir(&self, path: &str) -> io::Result<()> {
        SftpSession::remove_dir(self, path).await.map_err(to_io)
    }

    async fn remove_file(&self, path: &str) -> io::Result<()> {
        SftpSession::remove_file(self, path).await.map_err(to_io)
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        SftpSession::rename(self, from, to).await.map_err(to_io)
    }

    async fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        // OpenSSH's server reads the SYMLINK fields as (target, link)
        SftpSession::symlink(self, target, link_path)
            .await
            .map_err(to_io)
    }

    async fn read_link(&self, path: &str) -> io::Result<String> {
        SftpSession::read_link(self, path).await.map_err(to_io)
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        SftpSession::canonicalize(self, path).await.map_err(to_io)
    }

    async fn set_attrs(&self, path: &str, attrs: FileAttributes) -> io::Result<()> {
        self.set_metadata(path, attrs).await.map_err(to_io)
    }

    async fn close(&self) -> io::Result<()> {
        SftpSession::close(self).await.map_err(to_io)
    }
}
