//! Host-facing handle types.

use crate::error::VfsError;
use crate::rpc::FileToken;

/// An open remote file.
///
/// Holds nothing but the remote token. The host keeps it in its own per-open
/// bookkeeping (round-tripping it through [`FileHandle::into_raw`] and
/// [`FileHandle::from_raw`] where it only has room for an integer), and
/// `Session::close` consumes it so a closed handle cannot be used again.
#[derive(Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FileHandle(FileToken);

impl FileHandle {
    pub(crate) fn new(token: FileToken) -> Self {
        Self(token)
    }

    /// Rebuild a handle from a token the host stored.
    pub fn from_raw(raw: u64) -> Self {
        Self(FileToken(raw))
    }

    /// Give the token to the host for safekeeping.
    pub fn into_raw(self) -> u64 {
        self.0.0
    }

    /// The remote token.
    pub fn token(&self) -> FileToken {
        self.0
    }
}

/// Outcome of a best-effort release (`close`, `closedir`).
///
/// A release never fails from the host's point of view: the handle is gone
/// either way. `Failed` exists for observability only and callers are not
/// expected to propagate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The remote side acknowledged the release.
    Clean,
    /// The remote side reported an error; it was counted and logged.
    Failed(VfsError),
}

impl Release {
    /// Whether the remote side acknowledged the release.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}
