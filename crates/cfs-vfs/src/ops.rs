//! Host operations translated into remote calls.
//!
//! Every path-based operation composes its remote path first; a path that does
//! not fit is rejected with `NameTooLong` before any round trip. Remote
//! failures are counted, translated, and returned immediately: nothing here
//! retries, caches, or pre-checks remote state.

use std::borrow::Cow;

use crate::dir::{DirEntry, DirState, DirStream};
use crate::error::{RemoteError, RemoteResult, VfsResult};
use crate::handle::{FileHandle, Release};
use crate::rpc::{IoOffset, RemoteStatVfs, RpcConnection};
use crate::session::Session;
use crate::stat::{DiskUsage, HostStat};

impl<C: RpcConnection> Session<C> {
    // ========================================================================
    // Metadata
    // ========================================================================

    /// Stat a path.
    pub fn stat(&self, path: &str) -> VfsResult<HostStat> {
        let full = self.remote_path(path)?;
        let st = self.call("stat", |c| c.stat(&full))?;
        Ok(HostStat::from(&st))
    }

    /// Stat a path without following a final symlink.
    ///
    /// The remote service has no no-follow variant, so this is `stat`.
    pub fn lstat(&self, path: &str) -> VfsResult<HostStat> {
        self.stat(path)
    }

    /// Stat an open file.
    pub fn fstat(&self, file: &FileHandle) -> VfsResult<HostStat> {
        let st = self.call("fstat", |c| c.fstat(file.token()))?;
        Ok(HostStat::from(&st))
    }

    /// Full filesystem statistics for the filesystem containing `path`.
    pub fn statvfs(&self, path: &str) -> VfsResult<RemoteStatVfs> {
        let full = self.remote_path(path)?;
        self.call("statvfs", |c| c.statvfs(&full))
    }

    /// Free-space query.
    ///
    /// Returns `None` ("unavailable") on any failure instead of an error, which
    /// is what hosts expect from this query.
    pub fn disk_free(&self, path: &str) -> Option<DiskUsage> {
        match self.statvfs(path) {
            Ok(vfs) => Some(DiskUsage::from(&vfs)),
            Err(err) => {
                tracing::debug!("cfs_vfs: disk_free({}) unavailable: {}", path, err);
                None
            }
        }
    }

    // ========================================================================
    // File I/O
    // ========================================================================

    /// Open a file. `flags` and `mode` go to the remote service untouched.
    pub fn open(&self, path: &str, flags: i32, mode: u32) -> VfsResult<FileHandle> {
        let full = self.remote_path(path)?;
        let token = self.call("open", |c| c.open(&full, flags, mode))?;
        Ok(FileHandle::new(token))
    }

    /// Close a file. Best effort: the handle is gone whatever the remote says.
    pub fn close(&self, file: FileHandle) -> Release {
        let token = file.token();
        self.release("close", |c| c.close(token))
    }

    /// Read at the handle's current position.
    pub fn read(&self, file: &FileHandle, buf: &mut [u8]) -> VfsResult<usize> {
        self.read_from("read", file, IoOffset::Current, buf)
    }

    /// Read at `offset`.
    pub fn pread(&self, file: &FileHandle, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.read_from("pread", file, IoOffset::At(offset), buf)
    }

    /// Write at the handle's current position.
    pub fn write(&self, file: &FileHandle, buf: &[u8]) -> VfsResult<usize> {
        self.write_to("write", file, IoOffset::Current, buf)
    }

    /// Write at `offset`.
    pub fn pwrite(&self, file: &FileHandle, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.write_to("pwrite", file, IoOffset::At(offset), buf)
    }

    /// Flush a file to stable storage.
    pub fn fsync(&self, file: &FileHandle) -> VfsResult<()> {
        self.call("fsync", |c| c.fsync(file.token()))
    }

    /// Resize a file to exactly `len` bytes.
    pub fn ftruncate(&self, file: &FileHandle, len: u64) -> VfsResult<()> {
        self.call("ftruncate", |c| c.ftruncate(file.token(), len))
    }

    fn read_from(
        &self,
        op: &'static str,
        file: &FileHandle,
        offset: IoOffset,
        buf: &mut [u8],
    ) -> VfsResult<usize> {
        let n = match self.round_trip(|c| c.read(file.token(), offset, buf))? {
            Ok(n) => n,
            // End of data is a zero-length read.
            Err(RemoteError::EndOfSequence) => 0,
            Err(err) => return Err(self.fail(op, err)),
        };
        self.counters().add_read(n);
        Ok(n)
    }

    fn write_to(
        &self,
        op: &'static str,
        file: &FileHandle,
        offset: IoOffset,
        buf: &[u8],
    ) -> VfsResult<usize> {
        let n = self.call(op, |c| c.write(file.token(), offset, buf))?;
        self.counters().add_written(n);
        Ok(n)
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    /// Create a directory.
    pub fn mkdir(&self, path: &str, mode: u32) -> VfsResult<()> {
        let full = self.remote_path(path)?;
        self.call("mkdir", |c| c.mkdir(&full, mode))
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> VfsResult<()> {
        let full = self.remote_path(path)?;
        self.call("rmdir", |c| c.rmdir(&full))
    }

    /// Remove a file.
    pub fn unlink(&self, path: &str) -> VfsResult<()> {
        let full = self.remote_path(path)?;
        self.call("unlink", |c| c.unlink(&full))
    }

    /// Rename `src` to `dst`. Both paths are composed before any remote call.
    pub fn rename(&self, src: &str, dst: &str) -> VfsResult<()> {
        let src = self.remote_path(src)?;
        let dst = self.remote_path(dst)?;
        self.call("rename", |c| c.rename(&src, &dst))
    }

    // ========================================================================
    // Directory iteration
    // ========================================================================

    /// Open a directory for iteration.
    pub fn opendir(&self, path: &str) -> VfsResult<DirStream> {
        let full = self.remote_path(path)?;
        let token = self.call("opendir", |c| c.opendir(&full))?;
        Ok(DirStream::new(token))
    }

    /// Step a directory stream.
    ///
    /// Returns `Ok(None)` once the directory is exhausted. When `st` is given
    /// it receives the entry's inode and file-type bits only.
    ///
    /// After an error the stream's position is unspecified and it should be
    /// closed.
    pub fn readdir<'d>(
        &self,
        dir: &'d mut DirStream,
        st: Option<&mut HostStat>,
    ) -> VfsResult<Option<&'d DirEntry>> {
        if dir.state == DirState::Exhausted {
            return Ok(None);
        }

        let token = dir.token;
        let remote = &mut dir.remote;
        remote.clear();
        match self.round_trip(|c| c.readdir(token, remote))? {
            Ok(()) => {}
            Err(RemoteError::EndOfSequence) => {
                dir.state = DirState::Exhausted;
                return Ok(None);
            }
            Err(err) => return Err(self.fail("readdir", err)),
        }

        dir.state = DirState::Producing;
        dir.entry.fill_from(&dir.remote);
        if let Some(st) = st {
            dir.entry.fill_stat(st);
        }
        Ok(Some(&dir.entry))
    }

    /// Close a directory stream. Best effort, like [`Session::close`].
    pub fn closedir(&self, dir: DirStream) -> Release {
        let token = dir.token;
        self.release("closedir", |c| c.closedir(token))
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    /// Resolve `name` inside `dir` for a case-insensitive host.
    ///
    /// The remote namespace is case-sensitive and no directory scan is done:
    /// the requested name is returned unchanged.
    pub fn get_real_filename<'a>(&self, dir: &str, name: &'a str) -> Cow<'a, str> {
        tracing::trace!("cfs_vfs: get_real_filename({}, {})", dir, name);
        Cow::Borrowed(name)
    }

    fn release(
        &self,
        op: &'static str,
        f: impl FnOnce(&C) -> RemoteResult<()>,
    ) -> Release {
        let outcome = match self.round_trip(f) {
            Ok(Ok(())) => return Release::Clean,
            Ok(Err(err)) => self.fail(op, err),
            Err(err) => err,
        };
        tracing::warn!("cfs_vfs: {} error: {}", op, outcome);
        Release::Failed(outcome)
    }
}
