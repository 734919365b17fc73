//! Error domains and the translation between them.
//!
//! The remote service reports small integer codes ([`RemoteError`]); the host
//! expects POSIX-style conditions ([`VfsError`]). Translation is total: any code
//! the remote domain does not declare becomes [`VfsError::Io`].

use thiserror::Error;

/// Errors reported by the remote storage service.
///
/// Wire codes match the native RPC client (`0` is success and has no variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RemoteError {
    /// Code 1.
    #[error("remote: not found")]
    NotFound,
    /// Code 2.
    #[error("remote: exists")]
    Exists,
    /// Code 3.
    #[error("remote: permission denied")]
    Permission,
    /// Code 4.
    #[error("remote: I/O error")]
    Io,
    /// Code 5.
    #[error("remote: no space")]
    NoSpace,
    /// Code 6.
    #[error("remote: is a directory")]
    IsDirectory,
    /// Code 7.
    #[error("remote: not a directory")]
    NotDirectory,
    /// Code 8.
    #[error("remote: name too long")]
    NameTooLong,
    /// Code 9.
    #[error("remote: directory not empty")]
    NotEmpty,
    /// Code 10.
    #[error("remote: too many links")]
    TooManyLinks,
    /// Code 11.
    #[error("remote: timed out")]
    Timeout,
    /// Code 12.
    #[error("remote: connection refused")]
    ConnectionRefused,
    /// Code 13. Terminal outcome of directory iteration and end-of-data for
    /// reads; never an error in those contexts.
    #[error("remote: end of sequence")]
    EndOfSequence,
    /// A code outside the declared domain.
    #[error("remote: unknown error code {0}")]
    Unknown(i32),
}

impl RemoteError {
    /// Decode a wire code. Returns `None` for `0` (success).
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0 => return None,
            1 => Self::NotFound,
            2 => Self::Exists,
            3 => Self::Permission,
            4 => Self::Io,
            5 => Self::NoSpace,
            6 => Self::IsDirectory,
            7 => Self::NotDirectory,
            8 => Self::NameTooLong,
            9 => Self::NotEmpty,
            10 => Self::TooManyLinks,
            11 => Self::Timeout,
            12 => Self::ConnectionRefused,
            13 => Self::EndOfSequence,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    /// The wire code for this error.
    pub fn code(self) -> i32 {
        match self {
            Self::NotFound => 1,
            Self::Exists => 2,
            Self::Permission => 3,
            Self::Io => 4,
            Self::NoSpace => 5,
            Self::IsDirectory => 6,
            Self::NotDirectory => 7,
            Self::NameTooLong => 8,
            Self::NotEmpty => 9,
            Self::TooManyLinks => 10,
            Self::Timeout => 11,
            Self::ConnectionRefused => 12,
            Self::EndOfSequence => 13,
            Self::Unknown(code) => code,
        }
    }

    /// Convert a raw status code into a `Result`.
    pub fn check(code: i32) -> RemoteResult<()> {
        match Self::from_code(code) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

/// Result of a call against the remote service.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Host-visible error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum VfsError {
    /// ENOENT
    #[error("no such file or directory")]
    NotFound,
    /// EEXIST
    #[error("file exists")]
    AlreadyExists,
    /// EACCES
    #[error("permission denied")]
    AccessDenied,
    /// EIO
    #[error("input/output error")]
    Io,
    /// ENOSPC
    #[error("no space left on device")]
    NoSpace,
    /// EISDIR
    #[error("is a directory")]
    IsADirectory,
    /// ENOTDIR
    #[error("not a directory")]
    NotADirectory,
    /// ENAMETOOLONG. Also raised locally when a composed path does not fit.
    #[error("file name too long")]
    NameTooLong,
    /// ENOTEMPTY
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// EMLINK
    #[error("too many links")]
    TooManyLinks,
    /// ETIMEDOUT
    #[error("operation timed out")]
    TimedOut,
    /// ECONNREFUSED
    #[error("connection refused")]
    ConnectionRefused,
    /// ENOTCONN: the session's RPC connection was already released.
    #[error("session is not connected")]
    NotConnected,
}

impl VfsError {
    /// The POSIX errno the host should report for this condition.
    pub fn errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::AccessDenied => libc::EACCES,
            Self::Io => libc::EIO,
            Self::NoSpace => libc::ENOSPC,
            Self::IsADirectory => libc::EISDIR,
            Self::NotADirectory => libc::ENOTDIR,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::DirectoryNotEmpty => libc::ENOTEMPTY,
            Self::TooManyLinks => libc::EMLINK,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::ConnectionRefused => libc::ECONNREFUSED,
            Self::NotConnected => libc::ENOTCONN,
        }
    }
}

impl From<RemoteError> for VfsError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound => Self::NotFound,
            RemoteError::Exists => Self::AlreadyExists,
            RemoteError::Permission => Self::AccessDenied,
            RemoteError::Io => Self::Io,
            RemoteError::NoSpace => Self::NoSpace,
            RemoteError::IsDirectory => Self::IsADirectory,
            RemoteError::NotDirectory => Self::NotADirectory,
            RemoteError::NameTooLong => Self::NameTooLong,
            RemoteError::NotEmpty => Self::DirectoryNotEmpty,
            RemoteError::TooManyLinks => Self::TooManyLinks,
            RemoteError::Timeout => Self::TimedOut,
            RemoteError::ConnectionRefused => Self::ConnectionRefused,
            // Only readdir and read give end-of-sequence a meaning; anywhere
            // else it is a protocol violation.
            RemoteError::EndOfSequence | RemoteError::Unknown(_) => Self::Io,
        }
    }
}

/// Result type for host-visible operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// Outcome of translating a raw remote status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Code 0.
    Success,
    /// The end-of-sequence sentinel.
    EndOfSequence,
    /// Any failure, already mapped into the host's vocabulary.
    Error(VfsError),
}

/// Translate a raw remote status code.
pub fn translate(code: i32) -> Translation {
    match RemoteError::from_code(code) {
        None => Translation::Success,
        Some(RemoteError::EndOfSequence) => Translation::EndOfSequence,
        Some(err) => Translation::Error(err.into()),
    }
}
