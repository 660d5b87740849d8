//! Remote file operations over the SFTP subsystem.

pub mod client;
pub mod fs;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::SftpClient;
pub use fs::{RemoteFs, RemoteReader, RemoteWriter};
pub use types::{
    DirEntry, EntryType, FileAttrs, Group, Owner, SearchResult, format_mode, format_mode_octal,
    sort_entries,
};
