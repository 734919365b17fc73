//! C ABI surface.
//!
//! `cfs_vfs_err_to_errno` is always exported for hosts that talk to
//! `libcfsrpc` directly. With the `cfsrpc` feature the native client is bound
//! and exposed through [`CfsRpcConnector`].

use crate::error::{RemoteError, VfsError};

/// Translate a raw remote status code to an errno value.
///
/// `0` maps to `0`; every other code, including ones outside the declared
/// domain, maps to a non-zero errno (`EIO` when nothing better applies).
#[unsafe(no_mangle)]
pub extern "C" fn cfs_vfs_err_to_errno(code: i32) -> i32 {
    RemoteError::from_code(code).map_or(0, |err| VfsError::from(err).errno())
}

/// Decode a fixed-size C name field.
///
/// The name ends at the first NUL. A field filled without one is taken whole;
/// directory decoding truncates over-long names later.
#[cfg(any(test, feature = "cfsrpc"))]
fn dirent_name(raw: &[std::ffi::c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().map(|&c| c as u8).collect();
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

#[cfg(feature = "cfsrpc")]
pub use native::{CfsRpcConnection, CfsRpcConnector};

#[cfg(feature = "cfsrpc")]
mod native {
    use std::ffi::{CString, c_char, c_int};
    use std::ptr::{self, NonNull};
    use std::time::Duration;

    use crate::error::{RemoteError, RemoteResult};
    use crate::rpc::{
        DirToken, FileToken, IoOffset, RemoteDirEntry, RemoteStat, RemoteStatVfs, RpcConnection,
        RpcConnector,
    };

    /// Opaque `cfs_rpc_conn_t`.
    #[repr(C)]
    struct RawConn {
        _private: [u8; 0],
    }

    /// Opaque `cfs_dir_handle_t`.
    #[repr(C)]
    struct RawDir {
        _private: [u8; 0],
    }

    #[repr(C)]
    #[derive(Default)]
    struct RawStat {
        inode: u64,
        size: u64,
        mode: u32,
        nlink: u32,
        uid: u32,
        gid: u32,
        atime_sec: i64,
        mtime_sec: i64,
        ctime_sec: i64,
    }

    #[repr(C)]
    struct RawDirent {
        inode: u64,
        name: [c_char; 256],
        is_dir: bool,
        is_symlink: bool,
    }

    #[repr(C)]
    #[derive(Default)]
    struct RawStatVfs {
        block_size: u64,
        blocks_total: u64,
        blocks_free: u64,
        blocks_avail: u64,
        files_total: u64,
        files_free: u64,
    }

    #[link(name = "cfsrpc")]
    unsafe extern "C" {
        fn cfs_rpc_connect(
            addr: *const c_char,
            timeout_ms: u32,
            use_mtls: bool,
            conn_out: *mut *mut RawConn,
        ) -> c_int;
        fn cfs_rpc_disconnect(conn: *mut RawConn);

        fn cfs_rpc_stat(conn: *mut RawConn, path: *const c_char, out: *mut RawStat) -> c_int;
        fn cfs_rpc_fstat(conn: *mut RawConn, fh: u64, out: *mut RawStat) -> c_int;
        fn cfs_rpc_mkdir(conn: *mut RawConn, path: *const c_char, mode: u32) -> c_int;
        fn cfs_rpc_rmdir(conn: *mut RawConn, path: *const c_char) -> c_int;
        fn cfs_rpc_unlink(conn: *mut RawConn, path: *const c_char) -> c_int;
        fn cfs_rpc_rename(conn: *mut RawConn, src: *const c_char, dst: *const c_char) -> c_int;
        fn cfs_rpc_statvfs(conn: *mut RawConn, path: *const c_char, out: *mut RawStatVfs)
        -> c_int;

        fn cfs_rpc_open(
            conn: *mut RawConn,
            path: *const c_char,
            flags: c_int,
            mode: u32,
            fh_out: *mut u64,
        ) -> c_int;
        fn cfs_rpc_close(conn: *mut RawConn, fh: u64) -> c_int;
        fn cfs_rpc_read(
            conn: *mut RawConn,
            fh: u64,
            offset: i64,
            buf: *mut libc::c_void,
            len: usize,
            bytes_read: *mut libc::ssize_t,
        ) -> c_int;
        fn cfs_rpc_write(
            conn: *mut RawConn,
            fh: u64,
            offset: i64,
            buf: *const libc::c_void,
            len: usize,
            bytes_written: *mut libc::ssize_t,
        ) -> c_int;
        fn cfs_rpc_ftruncate(conn: *mut RawConn, fh: u64, len: i64) -> c_int;
        fn cfs_rpc_fsync(conn: *mut RawConn, fh: u64) -> c_int;

        fn cfs_rpc_opendir(
            conn: *mut RawConn,
            path: *const c_char,
            dh_out: *mut *mut RawDir,
        ) -> c_int;
        fn cfs_rpc_readdir(conn: *mut RawConn, dh: *mut RawDir, entry_out: *mut RawDirent)
        -> c_int;
        fn cfs_rpc_closedir(conn: *mut RawConn, dh: *mut RawDir) -> c_int;
    }

    fn c_path(path: &str) -> RemoteResult<CString> {
        // Interior NULs cannot cross the C boundary.
        CString::new(path).map_err(|_| RemoteError::Io)
    }

    fn transferred(n: libc::ssize_t) -> RemoteResult<usize> {
        usize::try_from(n).map_err(|_| RemoteError::Io)
    }

    impl From<RawStat> for RemoteStat {
        fn from(raw: RawStat) -> Self {
            Self {
                inode: raw.inode,
                size: raw.size,
                mode: raw.mode,
                nlink: raw.nlink,
                uid: raw.uid,
                gid: raw.gid,
                atime_sec: raw.atime_sec,
                mtime_sec: raw.mtime_sec,
                ctime_sec: raw.ctime_sec,
            }
        }
    }

    impl From<RawStatVfs> for RemoteStatVfs {
        fn from(raw: RawStatVfs) -> Self {
            Self {
                block_size: raw.block_size,
                blocks_total: raw.blocks_total,
                blocks_free: raw.blocks_free,
                blocks_avail: raw.blocks_avail,
                files_total: raw.files_total,
                files_free: raw.files_free,
            }
        }
    }

    /// Connects through the native `libcfsrpc` client.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CfsRpcConnector;

    impl RpcConnector for CfsRpcConnector {
        type Connection = CfsRpcConnection;

        fn connect(
            &self,
            addr: &str,
            timeout: Duration,
            use_mtls: bool,
        ) -> RemoteResult<CfsRpcConnection> {
            let addr = c_path(addr)?;
            let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
            let mut raw = ptr::null_mut();
            // SAFETY: addr is a valid NUL-terminated string for the duration of
            // the call and raw is a valid out-pointer.
            let code = unsafe { cfs_rpc_connect(addr.as_ptr(), timeout_ms, use_mtls, &mut raw) };
            RemoteError::check(code)?;
            let conn = NonNull::new(raw).ok_or(RemoteError::Io)?;
            Ok(CfsRpcConnection { conn })
        }
    }

    /// A live `libcfsrpc` connection.
    #[derive(Debug)]
    pub struct CfsRpcConnection {
        conn: NonNull<RawConn>,
    }

    // SAFETY: libcfsrpc connections are internally synchronized and may be
    // used from any thread.
    unsafe impl Send for CfsRpcConnection {}
    // SAFETY: see above; every entry point takes the connection by pointer and
    // serializes access itself.
    unsafe impl Sync for CfsRpcConnection {}

    impl CfsRpcConnection {
        fn raw(&self) -> *mut RawConn {
            self.conn.as_ptr()
        }

        fn dir(dir: DirToken) -> *mut RawDir {
            dir.0 as *mut RawDir
        }
    }

    impl RpcConnection for CfsRpcConnection {
        fn disconnect(self) {
            // SAFETY: the connection came from cfs_rpc_connect and disconnect
            // consumes self, so it is released exactly once.
            unsafe { cfs_rpc_disconnect(self.raw()) }
        }

        fn stat(&self, path: &str) -> RemoteResult<RemoteStat> {
            let path = c_path(path)?;
            let mut out = RawStat::default();
            // SAFETY: valid connection, C string and out-pointer.
            RemoteError::check(unsafe { cfs_rpc_stat(self.raw(), path.as_ptr(), &mut out) })?;
            Ok(out.into())
        }

        fn fstat(&self, file: FileToken) -> RemoteResult<RemoteStat> {
            let mut out = RawStat::default();
            // SAFETY: valid connection and out-pointer.
            RemoteError::check(unsafe { cfs_rpc_fstat(self.raw(), file.0, &mut out) })?;
            Ok(out.into())
        }

        fn mkdir(&self, path: &str, mode: u32) -> RemoteResult<()> {
            let path = c_path(path)?;
            // SAFETY: valid connection and C string.
            RemoteError::check(unsafe { cfs_rpc_mkdir(self.raw(), path.as_ptr(), mode) })
        }

        fn rmdir(&self, path: &str) -> RemoteResult<()> {
            let path = c_path(path)?;
            // SAFETY: valid connection and C string.
            RemoteError::check(unsafe { cfs_rpc_rmdir(self.raw(), path.as_ptr()) })
        }

        fn unlink(&self, path: &str) -> RemoteResult<()> {
            let path = c_path(path)?;
            // SAFETY: valid connection and C string.
            RemoteError::check(unsafe { cfs_rpc_unlink(self.raw(), path.as_ptr()) })
        }

        fn rename(&self, src: &str, dst: &str) -> RemoteResult<()> {
            let src = c_path(src)?;
            let dst = c_path(dst)?;
            // SAFETY: valid connection and C strings.
            RemoteError::check(unsafe { cfs_rpc_rename(self.raw(), src.as_ptr(), dst.as_ptr()) })
        }

        fn statvfs(&self, path: &str) -> RemoteResult<RemoteStatVfs> {
            let path = c_path(path)?;
            let mut out = RawStatVfs::default();
            // SAFETY: valid connection, C string and out-pointer.
            RemoteError::check(unsafe { cfs_rpc_statvfs(self.raw(), path.as_ptr(), &mut out) })?;
            Ok(out.into())
        }

        fn open(&self, path: &str, flags: i32, mode: u32) -> RemoteResult<FileToken> {
            let path = c_path(path)?;
            let mut fh = 0u64;
            // SAFETY: valid connection, C string and out-pointer.
            RemoteError::check(unsafe {
                cfs_rpc_open(self.raw(), path.as_ptr(), flags, mode, &mut fh)
            })?;
            Ok(FileToken(fh))
        }

        fn close(&self, file: FileToken) -> RemoteResult<()> {
            // SAFETY: valid connection; the token is opaque to us.
            RemoteError::check(unsafe { cfs_rpc_close(self.raw(), file.0) })
        }

        fn read(&self, file: FileToken, offset: IoOffset, buf: &mut [u8]) -> RemoteResult<usize> {
            let offset = offset.as_wire()?;
            let mut n: libc::ssize_t = 0;
            // SAFETY: buf is valid for writes of buf.len() bytes and n is a
            // valid out-pointer.
            let code = unsafe {
                cfs_rpc_read(
                    self.raw(),
                    file.0,
                    offset,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    &mut n,
                )
            };
            RemoteError::check(code)?;
            transferred(n)
        }

        fn write(&self, file: FileToken, offset: IoOffset, buf: &[u8]) -> RemoteResult<usize> {
            let offset = offset.as_wire()?;
            let mut n: libc::ssize_t = 0;
            // SAFETY: buf is valid for reads of buf.len() bytes and n is a
            // valid out-pointer.
            let code = unsafe {
                cfs_rpc_write(
                    self.raw(),
                    file.0,
                    offset,
                    buf.as_ptr().cast(),
                    buf.len(),
                    &mut n,
                )
            };
            RemoteError::check(code)?;
            transferred(n)
        }

        fn fsync(&self, file: FileToken) -> RemoteResult<()> {
            // SAFETY: valid connection.
            RemoteError::check(unsafe { cfs_rpc_fsync(self.raw(), file.0) })
        }

        fn ftruncate(&self, file: FileToken, len: u64) -> RemoteResult<()> {
            let len = i64::try_from(len).map_err(|_| RemoteError::Io)?;
            // SAFETY: valid connection.
            RemoteError::check(unsafe { cfs_rpc_ftruncate(self.raw(), file.0, len) })
        }

        fn opendir(&self, path: &str) -> RemoteResult<DirToken> {
            let path = c_path(path)?;
            let mut dh = ptr::null_mut();
            // SAFETY: valid connection, C string and out-pointer.
            RemoteError::check(unsafe { cfs_rpc_opendir(self.raw(), path.as_ptr(), &mut dh) })?;
            if dh.is_null() {
                return Err(RemoteError::Io);
            }
            Ok(DirToken(dh as usize))
        }

        fn readdir(&self, dir: DirToken, entry: &mut RemoteDirEntry) -> RemoteResult<()> {
            let mut raw = RawDirent {
                inode: 0,
                name: [0; 256],
                is_dir: false,
                is_symlink: false,
            };
            // SAFETY: the directory pointer came from cfs_rpc_opendir on this
            // connection and raw is a valid out-pointer.
            RemoteError::check(unsafe { cfs_rpc_readdir(self.raw(), Self::dir(dir), &mut raw) })?;

            entry.inode = raw.inode;
            entry.name.push_str(&super::dirent_name(&raw.name));
            entry.is_dir = raw.is_dir;
            entry.is_symlink = raw.is_symlink;
            Ok(())
        }

        fn closedir(&self, dir: DirToken) -> RemoteResult<()> {
            // SAFETY: the directory pointer came from cfs_rpc_opendir on this
            // connection; the caller never uses it again.
            RemoteError::check(unsafe { cfs_rpc_closedir(self.raw(), Self::dir(dir)) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_err_to_errno() {
        assert_eq!(cfs_vfs_err_to_errno(0), 0);
        assert_eq!(cfs_vfs_err_to_errno(1), libc::ENOENT);
        assert_eq!(cfs_vfs_err_to_errno(9), libc::ENOTEMPTY);
        assert_eq!(cfs_vfs_err_to_errno(11), libc::ETIMEDOUT);
        assert_eq!(cfs_vfs_err_to_errno(12), libc::ECONNREFUSED);
        // End-of-data is not an errno; reaching this path means a caller
        // treated it as a failure.
        assert_eq!(cfs_vfs_err_to_errno(13), libc::EIO);
        assert_eq!(cfs_vfs_err_to_errno(-7), libc::EIO);
        assert_eq!(cfs_vfs_err_to_errno(1000), libc::EIO);
    }

    fn c_name(name: &[u8]) -> [std::ffi::c_char; 256] {
        let mut raw = [0; 256];
        for (dst, &src) in raw.iter_mut().zip(name) {
            *dst = src as std::ffi::c_char;
        }
        raw
    }

    #[test]
    fn test_dirent_name_stops_at_nul() {
        assert_eq!(dirent_name(&c_name(b"notes.txt")), "notes.txt");
        assert_eq!(dirent_name(&c_name(b"")), "");
    }

    #[test]
    fn test_dirent_name_without_nul_uses_whole_field() {
        let name = dirent_name(&c_name(&[b'n'; 256]));
        assert_eq!(name.len(), 256);
        assert!(name.bytes().all(|b| b == b'n'));
    }
}
