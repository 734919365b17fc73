//! Module identity and the host registration surface.
//!
//! A host loads the module, asks it for its operation table, and routes every
//! operation named in the table to the session dispatcher. Anything the table
//! does not name falls through to the host's next layer.

use std::fmt;

/// Name the module registers under.
pub const MODULE_NAME: &str = "cfs_vfs";

/// Module version.
pub const MODULE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vendor string reported to the host.
pub const MODULE_VENDOR: &str = "ClaudeFS Project";

/// Host VFS interface version the operation table is declared against.
pub const VFS_INTERFACE_VERSION: u32 = 47;

/// An operation this module implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsOp {
    /// Establish a session.
    Connect,
    /// Tear down a session.
    Disconnect,
    /// Open a file.
    Open,
    /// Close a file.
    Close,
    /// Read at the current position.
    Read,
    /// Read at an offset.
    Pread,
    /// Write at the current position.
    Write,
    /// Write at an offset.
    Pwrite,
    /// Resize an open file.
    Ftruncate,
    /// Flush an open file.
    Fsync,
    /// Stat a path.
    Stat,
    /// Stat a path without following symlinks.
    Lstat,
    /// Stat an open file.
    Fstat,
    /// Remove a file.
    Unlink,
    /// Rename a path.
    Rename,
    /// Create a directory.
    Mkdir,
    /// Remove a directory.
    Rmdir,
    /// Open a directory cursor.
    Opendir,
    /// Step a directory cursor.
    Readdir,
    /// Close a directory cursor.
    Closedir,
    /// Free-space query.
    DiskFree,
    /// Case-insensitive name resolution.
    GetRealFilename,
}

impl VfsOp {
    /// Every implemented operation, in table order.
    pub const ALL: [VfsOp; 22] = [
        VfsOp::Connect,
        VfsOp::Disconnect,
        VfsOp::Open,
        VfsOp::Close,
        VfsOp::Read,
        VfsOp::Pread,
        VfsOp::Write,
        VfsOp::Pwrite,
        VfsOp::Ftruncate,
        VfsOp::Fsync,
        VfsOp::Stat,
        VfsOp::Lstat,
        VfsOp::Fstat,
        VfsOp::Unlink,
        VfsOp::Rename,
        VfsOp::Mkdir,
        VfsOp::Rmdir,
        VfsOp::Opendir,
        VfsOp::Readdir,
        VfsOp::Closedir,
        VfsOp::DiskFree,
        VfsOp::GetRealFilename,
    ];

    /// The host's name for the entry point.
    pub fn entry_point(self) -> &'static str {
        match self {
            VfsOp::Connect => "connect_fn",
            VfsOp::Disconnect => "disconnect_fn",
            VfsOp::Open => "open_fn",
            VfsOp::Close => "close_fn",
            VfsOp::Read => "read_fn",
            VfsOp::Pread => "pread_fn",
            VfsOp::Write => "write_fn",
            VfsOp::Pwrite => "pwrite_fn",
            VfsOp::Ftruncate => "ftruncate_fn",
            VfsOp::Fsync => "fsync_fn",
            VfsOp::Stat => "stat_fn",
            VfsOp::Lstat => "lstat_fn",
            VfsOp::Fstat => "fstat_fn",
            VfsOp::Unlink => "unlink_fn",
            VfsOp::Rename => "rename_fn",
            VfsOp::Mkdir => "mkdir_fn",
            VfsOp::Rmdir => "rmdir_fn",
            VfsOp::Opendir => "opendir_fn",
            VfsOp::Readdir => "readdir_fn",
            VfsOp::Closedir => "closedir_fn",
            VfsOp::DiskFree => "disk_free_fn",
            VfsOp::GetRealFilename => "get_real_filename_fn",
        }
    }

    /// Look up an operation by entry-point name.
    pub fn from_entry_point(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.entry_point() == name)
    }
}

impl fmt::Display for VfsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_point())
    }
}

/// Where the host should route an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled by this module.
    Implemented(VfsOp),
    /// Not in the table; the host's next layer handles it.
    FallThrough,
}

/// The table of entry points this module registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTable {
    ops: &'static [VfsOp],
}

impl OperationTable {
    /// The table for this module.
    pub const fn new() -> Self {
        Self { ops: &VfsOp::ALL }
    }

    /// Registered operations.
    pub fn ops(&self) -> &'static [VfsOp] {
        self.ops
    }

    /// Route a host entry point.
    pub fn dispatch(&self, entry_point: &str) -> Dispatch {
        self.ops
            .iter()
            .copied()
            .find(|op| op.entry_point() == entry_point)
            .map_or(Dispatch::FallThrough, Dispatch::Implemented)
    }
}

impl Default for OperationTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Host side of module registration.
pub trait HostRegistry {
    /// Error the host reports when it rejects a module.
    type Error;

    /// Record `table` under `module` for the given interface version.
    fn register_module(
        &mut self,
        interface_version: u32,
        module: &str,
        table: &OperationTable,
    ) -> Result<(), Self::Error>;
}

/// Register this module with a host.
pub fn register<H: HostRegistry>(host: &mut H) -> Result<(), H::Error> {
    tracing::debug!(
        "cfs_vfs: registering {} v{} ({} entry points)",
        MODULE_NAME,
        MODULE_VERSION,
        VfsOp::ALL.len()
    );
    host.register_module(VFS_INTERFACE_VERSION, MODULE_NAME, &OperationTable::new())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;

    #[derive(Default)]
    struct RecordingHost {
        modules: HashMap<String, (u32, OperationTable)>,
    }

    impl HostRegistry for RecordingHost {
        type Error = String;

        fn register_module(
            &mut self,
            interface_version: u32,
            module: &str,
            table: &OperationTable,
        ) -> Result<(), String> {
            if self.modules.contains_key(module) {
                return Err(format!("{module} already registered"));
            }
            self.modules
                .insert(module.to_string(), (interface_version, *table));
            Ok(())
        }
    }

    #[test]
    fn test_entry_points_are_unique() {
        let names: HashSet<_> = VfsOp::ALL.iter().map(|op| op.entry_point()).collect();
        assert_eq!(names.len(), VfsOp::ALL.len());
        for op in VfsOp::ALL {
            assert_eq!(VfsOp::from_entry_point(op.entry_point()), Some(op));
        }
    }

    #[test]
    fn test_dispatch() {
        let table = OperationTable::new();
        assert_eq!(table.dispatch("readdir_fn"), Dispatch::Implemented(VfsOp::Readdir));
        assert_eq!(
            table.dispatch("get_real_filename_fn"),
            Dispatch::Implemented(VfsOp::GetRealFilename)
        );
        assert_eq!(table.dispatch("symlinkat_fn"), Dispatch::FallThrough);
        assert_eq!(table.dispatch("fchmod_fn"), Dispatch::FallThrough);
    }

    #[test]
    fn test_register() {
        let mut host = RecordingHost::default();
        register(&mut host).unwrap();
        let (version, table) = host.modules["cfs_vfs"];
        assert_eq!(version, VFS_INTERFACE_VERSION);
        assert_eq!(table.ops().len(), 22);
        assert!(register(&mut host).is_err());
    }
}
