//! Dispatcher behavior against scripted RPC clients.
//!
//! The mocks record every call they receive so tests can assert not just what
//! the host sees but which round trips happened.

#![allow(clippy::unwrap_used)] // unwrap is acceptable in tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use cfs_vfs::{
    DirToken, FileHandle, FileToken, HostStat, IoOffset, PATH_CAPACITY, Release, RemoteDirEntry,
    RemoteError, RemoteResult, RemoteStat, RemoteStatVfs, RpcConnection, RpcConnector, Session,
    SessionConfig, Translation, VfsError, translate,
};

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("cfs_vfs=debug")
            .with_test_writer()
            .init();
    });
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<&'static str>>,
    releases: AtomicUsize,
    fail_with: Mutex<Option<RemoteError>>,
    entries: Vec<RemoteDirEntry>,
    cursor: AtomicUsize,
}

/// A scripted remote: every call succeeds unless a failure is armed.
#[derive(Clone, Default)]
struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    fn new() -> Self {
        Self::default()
    }

    fn failing(err: RemoteError) -> Self {
        let mock = Self::new();
        mock.fail_with(Some(err));
        mock
    }

    fn with_entries(names: &[&str]) -> Self {
        let entries = names
            .iter()
            .enumerate()
            .map(|(i, name)| RemoteDirEntry {
                inode: 100 + i as u64,
                name: name.to_string(),
                is_dir: name.ends_with('/'),
                is_symlink: false,
            })
            .collect();
        Self {
            state: Arc::new(MockState {
                entries,
                ..Default::default()
            }),
        }
    }

    fn fail_with(&self, err: Option<RemoteError>) {
        *self.state.fail_with.lock().unwrap() = err;
    }

    fn calls(&self) -> Vec<&'static str> {
        self.state.calls.lock().unwrap().clone()
    }

    fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| **c == op).count()
    }

    fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }
}

impl RpcConnector for MockConnector {
    type Connection = MockConnection;

    fn connect(
        &self,
        _addr: &str,
        _timeout: Duration,
        _use_mtls: bool,
    ) -> RemoteResult<MockConnection> {
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    fn respond<T>(&self, op: &'static str, ok: impl FnOnce() -> T) -> RemoteResult<T> {
        self.state.calls.lock().unwrap().push(op);
        match *self.state.fail_with.lock().unwrap() {
            Some(err) => Err(err),
            None => Ok(ok()),
        }
    }
}

impl RpcConnection for MockConnection {
    fn disconnect(self) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn stat(&self, _path: &str) -> RemoteResult<RemoteStat> {
        self.respond("stat", RemoteStat::default)
    }

    fn fstat(&self, _file: FileToken) -> RemoteResult<RemoteStat> {
        self.respond("fstat", RemoteStat::default)
    }

    fn mkdir(&self, _path: &str, _mode: u32) -> RemoteResult<()> {
        self.respond("mkdir", || ())
    }

    fn rmdir(&self, _path: &str) -> RemoteResult<()> {
        self.respond("rmdir", || ())
    }

    fn unlink(&self, _path: &str) -> RemoteResult<()> {
        self.respond("unlink", || ())
    }

    fn rename(&self, _src: &str, _dst: &str) -> RemoteResult<()> {
        self.respond("rename", || ())
    }

    fn statvfs(&self, _path: &str) -> RemoteResult<RemoteStatVfs> {
        self.respond("statvfs", RemoteStatVfs::default)
    }

    fn open(&self, _path: &str, _flags: i32, _mode: u32) -> RemoteResult<FileToken> {
        self.respond("open", || FileToken(7))
    }

    fn close(&self, _file: FileToken) -> RemoteResult<()> {
        self.respond("close", || ())
    }

    fn read(&self, _file: FileToken, _offset: IoOffset, buf: &mut [u8]) -> RemoteResult<usize> {
        self.respond("read", || buf.len())
    }

    fn write(&self, _file: FileToken, _offset: IoOffset, buf: &[u8]) -> RemoteResult<usize> {
        self.respond("write", || buf.len())
    }

    fn fsync(&self, _file: FileToken) -> RemoteResult<()> {
        self.respond("fsync", || ())
    }

    fn ftruncate(&self, _file: FileToken, _len: u64) -> RemoteResult<()> {
        self.respond("ftruncate", || ())
    }

    fn opendir(&self, _path: &str) -> RemoteResult<DirToken> {
        self.respond("opendir", || DirToken(3))
    }

    fn readdir(&self, _dir: DirToken, entry: &mut RemoteDirEntry) -> RemoteResult<()> {
        self.respond("readdir", || ())?;
        let next = self.state.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(remote) = self.state.entries.get(next) else {
            return Err(RemoteError::EndOfSequence);
        };
        entry.inode = remote.inode;
        entry.name.push_str(remote.name.trim_end_matches('/'));
        entry.is_dir = remote.is_dir;
        entry.is_symlink = remote.is_symlink;
        Ok(())
    }

    fn closedir(&self, _dir: DirToken) -> RemoteResult<()> {
        self.respond("closedir", || ())
    }
}

fn config(export: &str) -> SessionConfig {
    SessionConfig {
        export: export.to_string().try_into().unwrap(),
        ..Default::default()
    }
}

#[test]
fn test_translator_covers_declared_domain() {
    let expected = [
        (1, VfsError::NotFound),
        (2, VfsError::AlreadyExists),
        (3, VfsError::AccessDenied),
        (4, VfsError::Io),
        (5, VfsError::NoSpace),
        (6, VfsError::IsADirectory),
        (7, VfsError::NotADirectory),
        (8, VfsError::NameTooLong),
        (9, VfsError::DirectoryNotEmpty),
        (10, VfsError::TooManyLinks),
        (11, VfsError::TimedOut),
        (12, VfsError::ConnectionRefused),
    ];
    for (code, err) in expected {
        assert_eq!(translate(code), Translation::Error(err), "code {code}");
    }
    assert_eq!(translate(0), Translation::Success);
    assert_eq!(translate(13), Translation::EndOfSequence);
    for code in [-1, 14, 99, i32::MAX, i32::MIN] {
        assert_eq!(translate(code), Translation::Error(VfsError::Io), "code {code}");
    }
}

#[test]
fn test_overlong_path_never_reaches_remote() {
    init_tracing();
    let mock = MockConnector::new();
    let root = format!("/{}", "r".repeat(99));
    let session = Session::connect(&mock, config(&root)).unwrap();

    // root + '/' + rel + NUL fills the buffer exactly.
    let fits = "f".repeat(PATH_CAPACITY - root.len() - 2);
    let overflows = format!("{fits}x");

    assert!(session.stat(&fits).is_ok());
    assert_eq!(mock.count("stat"), 1);

    assert_eq!(session.stat(&overflows), Err(VfsError::NameTooLong));
    assert_eq!(session.open(&overflows, libc::O_RDONLY, 0), Err(VfsError::NameTooLong));
    assert_eq!(session.mkdir(&overflows, 0o755), Err(VfsError::NameTooLong));
    assert!(session.opendir(&overflows).is_err());
    assert!(session.disk_free(&overflows).is_none());
    assert_eq!(mock.calls(), vec!["stat"]);
    assert_eq!(session.stats().rpc_calls, 1);
    assert_eq!(session.stats().rpc_errors, 0);
}

#[test]
fn test_rename_composes_both_paths_before_calling() {
    init_tracing();
    let mock = MockConnector::failing(RemoteError::NotFound);
    let session = Session::connect(&mock, config("/export")).unwrap();

    let too_long = "d".repeat(PATH_CAPACITY);
    assert_eq!(
        session.rename("missing.txt", &too_long),
        Err(VfsError::NameTooLong)
    );
    assert_eq!(
        session.rename(&too_long, "dest.txt"),
        Err(VfsError::NameTooLong)
    );
    assert_eq!(mock.count("rename"), 0);

    assert_eq!(
        session.rename("missing.txt", "dest.txt"),
        Err(VfsError::NotFound)
    );
    assert_eq!(mock.count("rename"), 1);
    assert_eq!(session.stats().rpc_errors, 1);
}

#[test]
fn test_disconnect_releases_once() {
    let mock = MockConnector::new();
    let mut session = Session::connect(&mock, config("/export")).unwrap();
    assert!(session.is_connected());

    session.disconnect();
    session.disconnect();
    assert!(!session.is_connected());
    drop(session);
    assert_eq!(mock.releases(), 1);
}

#[test]
fn test_drop_releases_connection() {
    let mock = MockConnector::new();
    {
        let _session = Session::connect(&mock, config("/export")).unwrap();
    }
    assert_eq!(mock.releases(), 1);
}

#[test]
fn test_operations_after_disconnect() {
    let mock = MockConnector::new();
    let mut session = Session::connect(&mock, config("/export")).unwrap();
    let file = session.open("a.txt", libc::O_RDONLY, 0).unwrap();
    session.disconnect();

    assert_eq!(session.stat("a.txt"), Err(VfsError::NotConnected));
    assert_eq!(
        session.read(&file, &mut [0u8; 8]),
        Err(VfsError::NotConnected)
    );
    assert_eq!(session.close(file), Release::Failed(VfsError::NotConnected));
    assert_eq!(VfsError::NotConnected.errno(), libc::ENOTCONN);
    assert_eq!(mock.calls(), vec!["open"]);
}

#[test]
fn test_readdir_yields_entries_then_one_end() {
    init_tracing();
    let mock = MockConnector::with_entries(&["alpha", "beta/", "gamma", "delta"]);
    let session = Session::connect(&mock, config("/export")).unwrap();

    let mut dir = session.opendir("").unwrap();
    let mut names = Vec::new();
    let mut st = HostStat::default();
    while let Some(entry) = session.readdir(&mut dir, Some(&mut st)).unwrap() {
        names.push(entry.name().to_string());
        assert_eq!(st.ino, entry.ino());
        assert_eq!(st.is_dir(), entry.name() == "beta");
    }
    assert_eq!(names, ["alpha", "beta", "gamma", "delta"]);
    assert!(dir.is_exhausted());
    assert_eq!(mock.count("readdir"), 5);

    // Exhausted streams stay exhausted without another round trip.
    assert!(session.readdir(&mut dir, None).unwrap().is_none());
    assert_eq!(mock.count("readdir"), 5);

    assert!(session.closedir(dir).is_clean());
    assert_eq!(session.stats().rpc_errors, 0);
}

#[test]
fn test_empty_directory() {
    let mock = MockConnector::with_entries(&[]);
    let session = Session::connect(&mock, config("/export")).unwrap();
    let mut dir = session.opendir("empty").unwrap();
    assert!(session.readdir(&mut dir, None).unwrap().is_none());
    assert_eq!(mock.count("readdir"), 1);
    session.closedir(dir);
}

#[test]
fn test_timeouts_surface_and_count_once_per_call() {
    init_tracing();
    let mock = MockConnector::new();
    let session = Session::connect(&mock, config("/export")).unwrap();
    let mut dir = session.opendir("d").unwrap();
    let file = session.open("f", libc::O_RDWR, 0).unwrap();
    let before = session.stats();

    mock.fail_with(Some(RemoteError::Timeout));
    let mut buf = [0u8; 16];
    let results = [
        session.stat("f").map(drop),
        session.lstat("f").map(drop),
        session.fstat(&file).map(drop),
        session.statvfs("f").map(drop),
        session.open("g", libc::O_RDONLY, 0).map(drop),
        session.read(&file, &mut buf).map(drop),
        session.pread(&file, &mut buf, 4).map(drop),
        session.write(&file, b"data").map(drop),
        session.pwrite(&file, b"data", 4).map(drop),
        session.fsync(&file),
        session.ftruncate(&file, 0),
        session.mkdir("m", 0o755),
        session.rmdir("m"),
        session.unlink("f"),
        session.rename("f", "g"),
        session.opendir("d").map(drop),
        session.readdir(&mut dir, None).map(drop),
    ];
    for (i, result) in results.iter().enumerate() {
        assert_eq!(*result, Err(VfsError::TimedOut), "operation #{i}");
    }

    let after = session.stats();
    assert_eq!(after.rpc_calls - before.rpc_calls, results.len() as u64);
    assert_eq!(after.rpc_errors - before.rpc_errors, results.len() as u64);
    assert_eq!(after.read_bytes, 0);
    assert_eq!(after.write_bytes, 0);

    // Unavailable, but still one counted failure.
    assert!(session.disk_free("").is_none());
    assert_eq!(session.stats().rpc_errors, after.rpc_errors + 1);

    // A timeout is not fatal: the session recovers once the remote does.
    mock.fail_with(None);
    assert!(session.stat("f").is_ok());
    assert!(session.close(file).is_clean());
    session.closedir(dir);
}

#[test]
fn test_release_is_best_effort() {
    init_tracing();
    let mock = MockConnector::new();
    let session = Session::connect(&mock, config("/export")).unwrap();
    let file = session.open("f", libc::O_RDONLY, 0).unwrap();
    let dir = session.opendir("d").unwrap();

    mock.fail_with(Some(RemoteError::Io));
    assert_eq!(session.close(file), Release::Failed(VfsError::Io));
    assert_eq!(session.closedir(dir), Release::Failed(VfsError::Io));
    assert_eq!(session.stats().rpc_errors, 2);
    assert_eq!(mock.count("close"), 1);
    assert_eq!(mock.count("closedir"), 1);

    mock.fail_with(None);
    assert!(session.stat("f").is_ok());
}

#[test]
fn test_read_end_of_data_is_zero_bytes() {
    struct EofConnector;
    struct EofConnection;

    impl RpcConnector for EofConnector {
        type Connection = EofConnection;
        fn connect(&self, _: &str, _: Duration, _: bool) -> RemoteResult<EofConnection> {
            Ok(EofConnection)
        }
    }

    impl RpcConnection for EofConnection {
        fn disconnect(self) {}
        fn stat(&self, _: &str) -> RemoteResult<RemoteStat> {
            Err(RemoteError::Io)
        }
        fn fstat(&self, _: FileToken) -> RemoteResult<RemoteStat> {
            Err(RemoteError::Io)
        }
        fn mkdir(&self, _: &str, _: u32) -> RemoteResult<()> {
            Err(RemoteError::Io)
        }
        fn rmdir(&self, _: &str) -> RemoteResult<()> {
            Err(RemoteError::Io)
        }
        fn unlink(&self, _: &str) -> RemoteResult<()> {
            Err(RemoteError::Io)
        }
        fn rename(&self, _: &str, _: &str) -> RemoteResult<()> {
            Err(RemoteError::Io)
        }
        fn statvfs(&self, _: &str) -> RemoteResult<RemoteStatVfs> {
            Err(RemoteError::Io)
        }
        fn open(&self, _: &str, _: i32, _: u32) -> RemoteResult<FileToken> {
            Ok(FileToken(1))
        }
        fn close(&self, _: FileToken) -> RemoteResult<()> {
            Ok(())
        }
        fn read(&self, _: FileToken, _: IoOffset, _: &mut [u8]) -> RemoteResult<usize> {
            Err(RemoteError::EndOfSequence)
        }
        fn write(&self, _: FileToken, _: IoOffset, _: &[u8]) -> RemoteResult<usize> {
            Err(RemoteError::EndOfSequence)
        }
        fn fsync(&self, _: FileToken) -> RemoteResult<()> {
            Ok(())
        }
        fn ftruncate(&self, _: FileToken, _: u64) -> RemoteResult<()> {
            Ok(())
        }
        fn opendir(&self, _: &str) -> RemoteResult<DirToken> {
            Err(RemoteError::Io)
        }
        fn readdir(&self, _: DirToken, _: &mut RemoteDirEntry) -> RemoteResult<()> {
            Err(RemoteError::EndOfSequence)
        }
        fn closedir(&self, _: DirToken) -> RemoteResult<()> {
            Ok(())
        }
    }

    let session = Session::connect(&EofConnector, config("/export")).unwrap();
    let file = session.open("f", libc::O_RDWR, 0).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(session.read(&file, &mut buf), Ok(0));
    assert_eq!(session.pread(&file, &mut buf, 100), Ok(0));
    assert_eq!(session.stats().rpc_errors, 0);

    // Only reads treat end-of-data as a result.
    assert_eq!(session.write(&file, b"x"), Err(VfsError::Io));
    assert_eq!(session.stats().rpc_errors, 1);
}

#[test]
fn test_file_handle_survives_host_bookkeeping() {
    let mock = MockConnector::new();
    let session = Session::connect(&mock, config("/export")).unwrap();
    let file = session.open("f", libc::O_RDONLY, 0).unwrap();

    // The host keeps only an integer between calls.
    let raw = file.into_raw();
    assert_eq!(raw, 7);
    let file = FileHandle::from_raw(raw);
    assert_eq!(session.read(&file, &mut [0u8; 3]), Ok(3));
    assert!(session.close(file).is_clean());
}
