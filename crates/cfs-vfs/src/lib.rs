//! cfs-vfs: a file-server VFS adapter for ClaudeFS.
//!
//! Translates the operations a file-sharing host issues (stat, open, read,
//! readdir, ...) into round trips against the ClaudeFS RPC client, rooted at a
//! per-session export path, and maps remote failures back to POSIX-style
//! errors.
//!
//! ```
//! use cfs_vfs::{MemoryService, Session, SessionConfig};
//!
//! let service = MemoryService::new();
//! service.seed_file("/data/hello.txt", b"hello").unwrap();
//!
//! let config = SessionConfig::from_params([("export", "/data")]).unwrap();
//! let session = Session::connect(&service, config).unwrap();
//! assert_eq!(session.stat("hello.txt").unwrap().size, 5);
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod dir;
mod error;
mod handle;
mod memory;
mod module;
mod ops;
mod path;
mod rpc;
mod session;
mod stat;

pub mod ffi;

pub use config::{
    ConfigError, DEFAULT_EXPORT, DEFAULT_SERVER, DEFAULT_TIMEOUT, ExportRoot, SessionConfig,
};
pub use dir::{DirEntry, DirStream, NAME_MAX};
pub use error::{RemoteError, RemoteResult, Translation, VfsError, VfsResult, translate};
pub use handle::{FileHandle, Release};
pub use memory::{MemoryConnection, MemoryService};
pub use module::{
    Dispatch, HostRegistry, MODULE_NAME, MODULE_VENDOR, MODULE_VERSION, OperationTable,
    VFS_INTERFACE_VERSION, VfsOp, register,
};
pub use path::{PATH_CAPACITY, PathBuilder};
pub use rpc::{
    DirToken, FileToken, IoOffset, RemoteDirEntry, RemoteStat, RemoteStatVfs, RpcConnection,
    RpcConnector,
};
pub use session::{Session, SessionStats, StatsSnapshot};
pub use stat::{DiskUsage, FileKind, HostStat, STAT_BLOCK_SIZE, STAT_BLOCK_UNIT, Timespec};
