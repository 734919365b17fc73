//! Host-side metadata representations.

use serde::{Deserialize, Serialize};

use crate::rpc::{RemoteStat, RemoteStatVfs};

/// Block size reported to the host. Not carried by the remote record.
pub const STAT_BLOCK_SIZE: u64 = 4096;
/// Unit of `HostStat::blocks`.
pub const STAT_BLOCK_UNIT: u64 = 512;

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// Seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespec {
    /// Seconds.
    pub sec: i64,
    /// Nanoseconds. Always zero for remote timestamps.
    pub nsec: i64,
}

impl Timespec {
    /// A whole-second timestamp.
    pub fn from_secs(sec: i64) -> Self {
        Self { sec, nsec: 0 }
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else.
    Regular,
}

impl FileKind {
    /// Kind from a remote entry's flags. Directory wins over symlink.
    pub fn from_flags(is_dir: bool, is_symlink: bool) -> Self {
        if is_dir {
            Self::Directory
        } else if is_symlink {
            Self::Symlink
        } else {
            Self::Regular
        }
    }

    /// The `d_type` value for this kind.
    pub fn d_type(self) -> u8 {
        match self {
            Self::Directory => libc::DT_DIR,
            Self::Symlink => libc::DT_LNK,
            Self::Regular => libc::DT_REG,
        }
    }

    /// File-type mode bits (`S_IF*`) for this kind.
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::Regular => S_IFREG,
        }
    }
}

/// The host's stat representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStat {
    /// Inode number.
    pub ino: u64,
    /// Size in bytes.
    pub size: u64,
    /// Mode bits, file type included.
    pub mode: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Preferred I/O block size.
    pub blksize: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Last access.
    pub atime: Timespec,
    /// Last modification.
    pub mtime: Timespec,
    /// Last status change.
    pub ctime: Timespec,
}

impl HostStat {
    /// Whether the mode describes a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Whether the mode describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Whether the mode describes a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }
}

impl From<&RemoteStat> for HostStat {
    fn from(st: &RemoteStat) -> Self {
        Self {
            ino: st.inode,
            size: st.size,
            mode: st.mode,
            nlink: st.nlink,
            uid: st.uid,
            gid: st.gid,
            blksize: STAT_BLOCK_SIZE,
            blocks: st.size.div_ceil(STAT_BLOCK_UNIT),
            atime: Timespec::from_secs(st.atime_sec),
            mtime: Timespec::from_secs(st.mtime_sec),
            ctime: Timespec::from_secs(st.ctime_sec),
        }
    }
}

/// Answer to a free-space query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Block size in bytes.
    pub block_size: u64,
    /// Free blocks.
    pub free_blocks: u64,
    /// Total blocks.
    pub total_blocks: u64,
}

impl From<&RemoteStatVfs> for DiskUsage {
    fn from(vfs: &RemoteStatVfs) -> Self {
        Self {
            block_size: vfs.block_size,
            free_blocks: vfs.blocks_free,
            total_blocks: vfs.blocks_total,
        }
    }
}
