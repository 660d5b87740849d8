//! SFTP result types handed to the gateway as JSON

use chrono::{DateTime, TimeZone, Utc};
use russh_sftp::protocol::FileAttributes;
use serde::Serialize;

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// Kind of a remote entry, as reported by lstat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    Symlink,
}

impl EntryType {
    /// Devices, sockets and FIFOs report as `File`.
    pub fn from_permissions(permissions: Option<u32>) -> Self {
        match permissions.map(|p| p & S_IFMT) {
            Some(S_IFDIR) => EntryType::Dir,
            Some(S_IFLNK) => EntryType::Symlink,
            _ => EntryType::File,
        }
    }

    pub fn of(attrs: &FileAttributes) -> Self {
        Self::from_permissions(attrs.permissions)
    }

    pub fn is_dir(self) -> bool {
        self == EntryType::Dir
    }
}

/// `ls -l` style mode string, e.g. `-rw-r--r--` or `drwxr-xr-x`.
pub fn format_mode(permissions: u32) -> String {
    let kind = match permissions & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        S_IFREG | 0 => '-',
        _ => '?',
    };

    let bit = |mask: u32, c: char| if permissions & mask != 0 { c } else { '-' };
    let special = |exec: bool, set: bool, on: char, off: char| match (exec, set) {
        (true, true) => on,
        (false, true) => off,
        (true, false) => 'x',
        (false, false) => '-',
    };

    let mut mode = String::with_capacity(10);
    mode.push(kind);
    mode.push(bit(0o400, 'r'));
    mode.push(bit(0o200, 'w'));
    mode.push(special(permissions & 0o100 != 0, permissions & 0o4000 != 0, 's', 'S'));
    mode.push(bit(0o040, 'r'));
    mode.push(bit(0o020, 'w'));
    mode.push(special(permissions & 0o010 != 0, permissions & 0o2000 != 0, 's', 'S'));
    mode.push(bit(0o004, 'r'));
    mode.push(bit(0o002, 'w'));
    mode.push(special(permissions & 0o001 != 0, permissions & 0o1000 != 0, 't', 'T'));
    mode
}

/// Permission bits as four octal digits, e.g. `0755`
pub fn format_mode_octal(permissions: u32) -> String {
    format!("{:04o}", permissions & 0o7777)
}

pub(crate) fn timestamp(secs: Option<u32>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s as i64, 0).single())
}

/// Join a remote directory and an entry name
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub size: u64,
    pub mode: String,
    pub modified_at: Option<DateTime<Utc>>,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, attrs: &FileAttributes) -> Self {
        Self {
            name: name.into(),
            kind: EntryType::of(attrs),
            size: attrs.size.unwrap_or(0),
            mode: format_mode(attrs.permissions.unwrap_or(0)),
            modified_at: timestamp(attrs.mtime),
        }
    }
}

/// Directories first, then case-insensitive by name.
pub fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| {
        b.kind
            .is_dir()
            .cmp(&a.kind.is_dir())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub uid: u32,
    /// Empty when the name could not be resolved
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub gid: u32,
    pub name: String,
}

/// Extended metadata for a single path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttrs {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub mode: String,
    pub mode_octal: String,
    pub owner: Owner,
    pub group: Group,
    pub size: u64,
    pub accessed_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// SFTP v3 has no creation time; this is the modify time
    pub created_at: Option<DateTime<Utc>>,
}

impl FileAttrs {
    /// Build from wire attributes; owner and group names start empty.
    pub fn new(path: impl Into<String>, attrs: &FileAttributes) -> Self {
        let permissions = attrs.permissions.unwrap_or(0);
        let modified_at = timestamp(attrs.mtime);
        Self {
            path: path.into(),
            kind: EntryType::of(attrs),
            mode: format_mode(permissions),
            mode_octal: format_mode_octal(permissions),
            owner: Owner {
                uid: attrs.uid.unwrap_or(0),
                name: String::new(),
            },
            group: Group {
                gid: attrs.gid.unwrap_or(0),
                name: String::new(),
            },
            size: attrs.size.unwrap_or(0),
            accessed_at: timestamp(attrs.atime).or(modified_at),
            modified_at,
            created_at: modified_at,
        }
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub size: u64,
    pub mode: String,
    pub modified_at: Option<DateTime<Utc>>,
}

impl SearchResult {
    pub fn new(path: String, name: String, attrs: &FileAttributes) -> Self {
        Self {
            path,
            name,
            kind: EntryType::of(attrs),
            size: attrs.size.unwrap_or(0),
            mode: format_mode(attrs.permissions.unwrap_or(0)),
            modified_at: timestamp(attrs.mtime),
        }
    }
}
