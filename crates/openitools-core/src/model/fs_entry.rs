/// A single file or directory on the device, decoded from the native tree.
///
/// Entries are plain owned values: once decoded at the boundary nothing in
/// the tree refers back to native memory.
use chrono::{DateTime, Utc};
use compact_str::CompactString;

/// File type as reported by the device's AFC service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FileKind {
    Directory,
    File,
    Symlink,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Socket,
    #[default]
    Unknown,
}

impl FileKind {
    /// Map the native `file_type` discriminant. Out-of-range values are
    /// `Unknown` rather than undefined behaviour.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Directory,
            1 => Self::File,
            2 => Self::Symlink,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::NamedPipe,
            6 => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// Discriminant used on the native side.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Directory => 0,
            Self::File => 1,
            Self::Symlink => 2,
            Self::CharDevice => 3,
            Self::BlockDevice => 4,
            Self::NamedPipe => 5,
            Self::Socket => 6,
            Self::Unknown => 7,
        }
    }

    /// Map an AFC `st_ifmt` string (`S_IFDIR`, `S_IFREG`, ...).
    pub fn from_ifmt(ifmt: &str) -> Self {
        match ifmt {
            "S_IFDIR" => Self::Directory,
            "S_IFREG" => Self::File,
            "S_IFLNK" => Self::Symlink,
            "S_IFCHR" => Self::CharDevice,
            "S_IFBLK" => Self::BlockDevice,
            "S_IFIFO" => Self::NamedPipe,
            "S_IFSOCK" => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::Symlink => "symlink",
            Self::CharDevice => "character device",
            Self::BlockDevice => "block device",
            Self::NamedPipe => "named pipe(fifo)",
            Self::Socket => "socket",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One node of the remote filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct FsEntry {
    /// Full device path, always `/`-separated and absolute.
    pub path: String,

    /// Logical size in bytes.
    pub size: u64,

    /// Number of allocated blocks.
    pub blocks: u64,

    /// Link count exactly as the device reports it.
    pub nlink: CompactString,

    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,

    pub kind: FileKind,

    /// `None` until the node has been expanded. Expansion replaces the
    /// whole vector; it never merges with a previous listing.
    pub children: Option<Vec<FsEntry>>,
}

impl FsEntry {
    /// Placeholder for a directory that has not been listed yet.
    pub fn unlisted_dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            blocks: 0,
            nlink: CompactString::default(),
            created: None,
            modified: None,
            kind: FileKind::Directory,
            children: None,
        }
    }

    /// Last path segment (`/` for the root).
    pub fn name(&self) -> &str {
        match self.path.rsplit('/').find(|s| !s.is_empty()) {
            Some(name) => name,
            None => "/",
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Directories can always be (re-)expanded; everything else is a leaf.
    #[inline]
    pub fn is_expandable(&self) -> bool {
        self.is_dir()
    }

    /// `true` once children have been materialized by an expansion.
    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.children.is_some()
    }

    /// Human-readable size, e.g. `"1.5 KB"`.
    pub fn size_display(&self) -> String {
        super::size::format_size(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_discriminants_round_trip_and_clamp() {
        for raw in 0..8 {
            assert_eq!(FileKind::from_raw(raw).to_raw(), raw);
        }
        assert_eq!(FileKind::from_raw(-1), FileKind::Unknown);
        assert_eq!(FileKind::from_raw(42), FileKind::Unknown);
    }

    #[test]
    fn ifmt_strings_map_to_kinds() {
        assert_eq!(FileKind::from_ifmt("S_IFDIR"), FileKind::Directory);
        assert_eq!(FileKind::from_ifmt("S_IFREG"), FileKind::File);
        assert_eq!(FileKind::from_ifmt("S_IFIFO"), FileKind::NamedPipe);
        assert_eq!(FileKind::from_ifmt("bogus"), FileKind::Unknown);
        assert_eq!(FileKind::NamedPipe.to_string(), "named pipe(fifo)");
    }

    #[test]
    fn name_is_last_segment() {
        assert_eq!(FsEntry::unlisted_dir("/").name(), "/");
        assert_eq!(FsEntry::unlisted_dir("/DCIM").name(), "DCIM");
        assert_eq!(FsEntry::unlisted_dir("/DCIM/100APPLE").name(), "100APPLE");
    }

    #[test]
    fn unlisted_dir_is_expandable_but_not_expanded() {
        let entry = FsEntry::unlisted_dir("/DCIM");
        assert!(entry.is_expandable());
        assert!(!entry.is_expanded());
    }
}
