//! Directory iteration state.
//!
//! Each [`DirStream`] owns the scratch storage its entries are translated into,
//! so iterating different directories concurrently is safe and a readdir step
//! allocates nothing once the name buffer has grown. Two concurrent readdir
//! calls on the *same* stream are impossible to express: stepping takes
//! `&mut DirStream`.

use crate::rpc::{DirToken, RemoteDirEntry};
use crate::stat::{FileKind, HostStat};

/// Longest entry name handed to the host, in bytes. Longer names are truncated.
pub const NAME_MAX: usize = 255;

/// One directory entry as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    ino: u64,
    kind: FileKind,
    name: String,
}

impl DirEntry {
    fn empty() -> Self {
        Self {
            ino: 0,
            kind: FileKind::Regular,
            name: String::with_capacity(NAME_MAX),
        }
    }

    /// Inode number.
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Entry kind.
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// `d_type` for the entry.
    pub fn d_type(&self) -> u8 {
        self.kind.d_type()
    }

    /// Entry name, at most [`NAME_MAX`] bytes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overwrite this entry from a remote record.
    pub(crate) fn fill_from(&mut self, remote: &RemoteDirEntry) {
        self.ino = remote.inode;
        self.kind = FileKind::from_flags(remote.is_dir, remote.is_symlink);
        self.name.clear();
        self.name.push_str(truncate_name(&remote.name));
    }

    /// Populate the partial stat available from an entry alone.
    ///
    /// Only the inode and file-type bits are known; everything else needs a
    /// separate stat call.
    pub(crate) fn fill_stat(&self, st: &mut HostStat) {
        st.ino = self.ino;
        st.mode = self.kind.mode_bits();
    }
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= NAME_MAX {
        return name;
    }
    let mut end = NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirState {
    Open,
    Producing,
    Exhausted,
}

/// An open directory cursor.
///
/// Obtained from `Session::opendir` and released with `Session::closedir`.
#[derive(Debug)]
pub struct DirStream {
    pub(crate) token: DirToken,
    pub(crate) remote: RemoteDirEntry,
    pub(crate) entry: DirEntry,
    pub(crate) state: DirState,
}

impl DirStream {
    pub(crate) fn new(token: DirToken) -> Self {
        Self {
            token,
            remote: RemoteDirEntry::default(),
            entry: DirEntry::empty(),
            state: DirState::Open,
        }
    }

    /// The remote cursor token.
    pub fn token(&self) -> DirToken {
        self.token
    }

    /// Whether iteration reached end-of-sequence.
    pub fn is_exhausted(&self) -> bool {
        self.state == DirState::Exhausted
    }
}
