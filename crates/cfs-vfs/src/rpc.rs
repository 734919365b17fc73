//! The RPC client interface this adapter drives.
//!
//! The remote storage service and its wire protocol live behind these traits.
//! Every call is one blocking round trip and reports failures from the remote
//! error domain ([`RemoteError`](crate::RemoteError)).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, RemoteResult};

/// Remote identity of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileToken(pub u64);

/// Remote identity of an open directory cursor. Pointer-sized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirToken(pub usize);

/// Where a read or write starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOffset {
    /// The remote handle's current position.
    Current,
    /// An explicit byte offset.
    At(u64),
}

impl IoOffset {
    /// Wire encoding: `-1` selects the current position.
    ///
    /// Offsets beyond `i64::MAX` have no wire form and fail with
    /// [`RemoteError::Io`] rather than being clamped.
    pub fn as_wire(self) -> RemoteResult<i64> {
        match self {
            Self::Current => Ok(-1),
            Self::At(offset) => i64::try_from(offset).map_err(|_| RemoteError::Io),
        }
    }
}

/// Metadata record returned by stat-by-path and stat-by-handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStat {
    /// Inode number.
    pub inode: u64,
    /// Size in bytes.
    pub size: u64,
    /// POSIX mode bits, file type included.
    pub mode: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Last access, seconds since the epoch.
    pub atime_sec: i64,
    /// Last modification, seconds since the epoch.
    pub mtime_sec: i64,
    /// Last status change, seconds since the epoch.
    pub ctime_sec: i64,
}

/// One step of remote directory iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDirEntry {
    /// Inode number.
    pub inode: u64,
    /// Entry name.
    pub name: String,
    /// Entry is a directory.
    pub is_dir: bool,
    /// Entry is a symbolic link.
    pub is_symlink: bool,
}

impl RemoteDirEntry {
    /// Reset to the empty state, keeping the name allocation.
    pub fn clear(&mut self) {
        self.inode = 0;
        self.name.clear();
        self.is_dir = false;
        self.is_symlink = false;
    }
}

/// Filesystem statistics (statvfs equivalent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatVfs {
    /// Block size in bytes.
    pub block_size: u64,
    /// Total blocks.
    pub blocks_total: u64,
    /// Free blocks.
    pub blocks_free: u64,
    /// Blocks available to unprivileged users.
    pub blocks_avail: u64,
    /// Total inodes.
    pub files_total: u64,
    /// Free inodes.
    pub files_free: u64,
}

/// Establishes connections to the remote service.
pub trait RpcConnector {
    /// The connection type produced.
    type Connection: RpcConnection;

    /// Connect to `addr`. The timeout applies to every later call on the
    /// returned connection.
    fn connect(
        &self,
        addr: &str,
        timeout: Duration,
        use_mtls: bool,
    ) -> RemoteResult<Self::Connection>;
}

/// An established connection to the remote service.
///
/// Implementations must be safe for whatever concurrency the host exposes a
/// session to; the adapter adds no locking of its own.
pub trait RpcConnection: Send + Sync {
    /// Release the connection. Never fails.
    fn disconnect(self);

    /// Stat by absolute remote path.
    fn stat(&self, path: &str) -> RemoteResult<RemoteStat>;

    /// Stat by open file.
    fn fstat(&self, file: FileToken) -> RemoteResult<RemoteStat>;

    /// Create a directory.
    fn mkdir(&self, path: &str, mode: u32) -> RemoteResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &str) -> RemoteResult<()>;

    /// Remove a non-directory entry.
    fn unlink(&self, path: &str) -> RemoteResult<()>;

    /// Rename `src` to `dst`.
    fn rename(&self, src: &str, dst: &str) -> RemoteResult<()>;

    /// Filesystem statistics for the filesystem containing `path`.
    fn statvfs(&self, path: &str) -> RemoteResult<RemoteStatVfs>;

    /// Open a file. `flags` and `mode` are the host's, uninterpreted.
    fn open(&self, path: &str, flags: i32, mode: u32) -> RemoteResult<FileToken>;

    /// Close a file.
    fn close(&self, file: FileToken) -> RemoteResult<()>;

    /// Read into `buf`, returning bytes transferred.
    ///
    /// End of data may be reported as [`RemoteError::EndOfSequence`](crate::RemoteError::EndOfSequence).
    fn read(&self, file: FileToken, offset: IoOffset, buf: &mut [u8]) -> RemoteResult<usize>;

    /// Write from `buf`, returning bytes transferred.
    fn write(&self, file: FileToken, offset: IoOffset, buf: &[u8]) -> RemoteResult<usize>;

    /// Flush a file to stable storage.
    fn fsync(&self, file: FileToken) -> RemoteResult<()>;

    /// Resize a file to exactly `len` bytes.
    fn ftruncate(&self, file: FileToken, len: u64) -> RemoteResult<()>;

    /// Open a directory cursor.
    fn opendir(&self, path: &str) -> RemoteResult<DirToken>;

    /// Fill `entry` with the next directory entry.
    ///
    /// Exhaustion is reported as [`RemoteError::EndOfSequence`](crate::RemoteError::EndOfSequence).
    fn readdir(&self, dir: DirToken, entry: &mut RemoteDirEntry) -> RemoteResult<()>;

    /// Close a directory cursor.
    fn closedir(&self, dir: DirToken) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_wire_encoding() {
        assert_eq!(IoOffset::Current.as_wire(), Ok(-1));
        assert_eq!(IoOffset::At(0).as_wire(), Ok(0));
        assert_eq!(IoOffset::At(4096).as_wire(), Ok(4096));
        assert_eq!(IoOffset::At(i64::MAX as u64).as_wire(), Ok(i64::MAX));
    }

    #[test]
    fn test_offset_beyond_wire_range_is_rejected() {
        assert_eq!(
            IoOffset::At(i64::MAX as u64 + 1).as_wire(),
            Err(RemoteError::Io)
        );
        assert_eq!(IoOffset::At(u64::MAX).as_wire(), Err(RemoteError::Io));
    }

    #[test]
    fn test_dir_entry_clear_keeps_capacity() {
        let mut entry = RemoteDirEntry {
            inode: 7,
            name: "notes.txt".to_string(),
            is_dir: false,
            is_symlink: true,
        };
        let cap = entry.name.capacity();
        entry.clear();
        assert_eq!(entry, RemoteDirEntry::default());
        assert_eq!(entry.name.capacity(), cap);
    }
}
