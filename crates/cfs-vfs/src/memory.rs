//! In-memory loopback implementation of the RPC client interface.
//!
//! Behaves like a small POSIX namespace held in process memory: open flags
//! (create, exclusive, truncate, append) are honored, directory cursors snapshot
//! their listing at opendir, and capacity is enforced for writes. Used for
//! end-to-end tests and as the CLI's default backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{RemoteError, RemoteResult};
use crate::rpc::{
    DirToken, FileToken, IoOffset, RemoteDirEntry, RemoteStat, RemoteStatVfs, RpcConnection,
    RpcConnector,
};
use crate::stat::FileKind;

const BLOCK_SIZE: u64 = 4096;
const DEFAULT_CAPACITY: u64 = 1 << 30;
const DEFAULT_MAX_FILES: u64 = 1 << 20;
const ROOT_INODE: u64 = 1;

#[derive(Debug)]
enum Content {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug)]
struct Node {
    content: Content,
    perm: u32,
    atime: i64,
    mtime: i64,
    ctime: i64,
}

impl Node {
    fn new(content: Content, perm: u32) -> Self {
        let now = now_secs();
        Self {
            content,
            perm: perm & 0o7777,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.content, Content::Dir)
    }

    fn size(&self) -> u64 {
        match &self.content {
            Content::File(data) => data.len() as u64,
            Content::Dir => 0,
        }
    }

    fn kind(&self) -> FileKind {
        if self.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Regular
        }
    }
}

#[derive(Debug)]
struct OpenFile {
    inode: u64,
    pos: u64,
    readable: bool,
    writable: bool,
    append: bool,
}

#[derive(Debug)]
struct DirCursor {
    entries: Vec<RemoteDirEntry>,
    next: usize,
}

#[derive(Debug)]
struct State {
    names: BTreeMap<String, u64>,
    nodes: HashMap<u64, Node>,
    open_files: HashMap<u64, OpenFile>,
    open_dirs: HashMap<usize, DirCursor>,
    next_inode: u64,
    next_fh: u64,
    next_dh: usize,
    capacity: u64,
    max_files: u64,
}

impl State {
    fn new(capacity: u64, max_files: u64) -> Self {
        let mut names = BTreeMap::new();
        let mut nodes = HashMap::new();
        names.insert("/".to_string(), ROOT_INODE);
        nodes.insert(ROOT_INODE, Node::new(Content::Dir, 0o755));
        Self {
            names,
            nodes,
            open_files: HashMap::new(),
            open_dirs: HashMap::new(),
            next_inode: ROOT_INODE + 1,
            next_fh: 1,
            next_dh: 1,
            capacity,
            max_files,
        }
    }

    fn lookup(&self, path: &str) -> RemoteResult<u64> {
        self.names.get(path).copied().ok_or(RemoteError::NotFound)
    }

    fn node(&self, inode: u64) -> RemoteResult<&Node> {
        self.nodes.get(&inode).ok_or(RemoteError::NotFound)
    }

    fn node_mut(&mut self, inode: u64) -> RemoteResult<&mut Node> {
        self.nodes.get_mut(&inode).ok_or(RemoteError::NotFound)
    }

    /// Parent must exist and be a directory.
    fn check_parent(&self, path: &str) -> RemoteResult<()> {
        let parent = parent_of(path);
        let inode = self.lookup(parent)?;
        if self.node(inode)?.is_dir() {
            Ok(())
        } else {
            Err(RemoteError::NotDirectory)
        }
    }

    fn children(&self, dir: &str) -> impl Iterator<Item = (&str, u64)> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        self.names
            .range(prefix.clone()..)
            .take_while(move |(name, _)| name.starts_with(&prefix))
            .filter_map(move |(name, inode)| {
                let rest = &name[dir.len().max(1)..];
                let rest = rest.strip_prefix('/').unwrap_or(rest);
                (!rest.is_empty() && !rest.contains('/')).then_some((rest, *inode))
            })
    }

    fn create_node(&mut self, path: &str, content: Content, perm: u32) -> RemoteResult<u64> {
        if self.nodes.len() as u64 >= self.max_files {
            return Err(RemoteError::NoSpace);
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.nodes.insert(inode, Node::new(content, perm));
        self.names.insert(path.to_string(), inode);
        if let Ok(parent) = self.lookup(parent_of(path)) {
            self.touch(parent);
        }
        Ok(inode)
    }

    fn touch(&mut self, inode: u64) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            let now = now_secs();
            node.mtime = now;
            node.ctime = now;
        }
    }

    fn used_blocks(&self) -> u64 {
        self.nodes.values().map(|n| n.size().div_ceil(BLOCK_SIZE)).sum()
    }

    /// Check that a file may grow from `current` to `len` bytes.
    fn reserve(&self, current: u64, len: u64) -> RemoteResult<()> {
        if len <= current {
            return Ok(());
        }
        let grow = len.div_ceil(BLOCK_SIZE) - current.div_ceil(BLOCK_SIZE);
        let needed = self
            .used_blocks()
            .checked_add(grow)
            .ok_or(RemoteError::NoSpace)?;
        if needed > self.capacity / BLOCK_SIZE {
            return Err(RemoteError::NoSpace);
        }
        Ok(())
    }

    /// Drop a node once neither a name nor an open handle refers to it.
    fn reap(&mut self, inode: u64) {
        let named = self.names.values().any(|&i| i == inode);
        let open = self.open_files.values().any(|f| f.inode == inode);
        if !named && !open {
            self.nodes.remove(&inode);
        }
    }

    fn nlink(&self, inode: u64, node: &Node) -> u32 {
        if !node.is_dir() {
            return 1;
        }
        let path = self.names.iter().find(|&(_, &i)| i == inode).map(|(p, _)| p);
        let subdirs = path.map_or(0, |p| {
            self.children(p)
                .filter(|&(_, child)| self.nodes.get(&child).is_some_and(Node::is_dir))
                .count()
        });
        2 + subdirs as u32
    }

    fn stat_of(&self, inode: u64) -> RemoteResult<RemoteStat> {
        let node = self.node(inode)?;
        Ok(RemoteStat {
            inode,
            size: node.size(),
            mode: node.kind().mode_bits() | node.perm,
            nlink: self.nlink(inode, node),
            uid: 0,
            gid: 0,
            atime_sec: node.atime,
            mtime_sec: node.mtime,
            ctime_sec: node.ctime,
        })
    }

    fn write_at(&mut self, inode: u64, offset: u64, buf: &[u8]) -> RemoteResult<usize> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(RemoteError::NoSpace)?;
        let current = self.node(inode)?.size();
        self.reserve(current, end)?;
        let node = self.node_mut(inode)?;
        let Content::File(data) = &mut node.content else {
            return Err(RemoteError::IsDirectory);
        };
        let start = usize::try_from(offset).map_err(|_| RemoteError::NoSpace)?;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        let now = now_secs();
        node.mtime = now;
        node.ctime = now;
        Ok(buf.len())
    }
}

/// Canonical form of a remote path: absolute, no empty or `.` segments, `..`
/// resolved against the root.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// An in-memory remote service.
///
/// Cloning shares the namespace, so several sessions connected through clones
/// of one service see the same files.
#[derive(Debug, Clone)]
pub struct MemoryService {
    state: Arc<Mutex<State>>,
    refuse: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    /// A service with an empty root directory and 1 GiB of space.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A service holding at most `bytes` of file data.
    pub fn with_capacity(bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(bytes, DEFAULT_MAX_FILES))),
            refuse: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make later connection attempts fail with `ConnectionRefused`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Successful connections so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections released so far.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Files currently open across all connections.
    pub fn open_file_count(&self) -> usize {
        self.lock().open_files.len()
    }

    /// Directory cursors currently open across all connections.
    pub fn open_dir_count(&self) -> usize {
        self.lock().open_dirs.len()
    }

    /// Create (or replace) a file, creating missing parent directories.
    pub fn seed_file(&self, path: &str, data: &[u8]) -> RemoteResult<()> {
        let path = normalize(path);
        self.seed_dirs(parent_of(&path))?;
        let mut state = self.lock();
        match state.names.get(&path).copied() {
            Some(inode) => {
                let node = state.node_mut(inode)?;
                match &mut node.content {
                    Content::File(existing) => *existing = data.to_vec(),
                    Content::Dir => return Err(RemoteError::IsDirectory),
                }
            }
            None => {
                state.create_node(&path, Content::File(data.to_vec()), 0o644)?;
            }
        }
        Ok(())
    }

    /// Create a directory and any missing parents.
    pub fn seed_dirs(&self, path: &str) -> RemoteResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match state.names.get(&current).copied() {
                Some(inode) if state.node(inode)?.is_dir() => {}
                Some(_) => return Err(RemoteError::NotDirectory),
                None => {
                    state.create_node(&current, Content::Dir, 0o755)?;
                }
            }
        }
        Ok(())
    }

    /// Contents of a file, if it exists.
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let inode = state.names.get(&normalize(path))?;
        match &state.nodes.get(inode)?.content {
            Content::File(data) => Some(data.clone()),
            Content::Dir => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RpcConnector for MemoryService {
    type Connection = MemoryConnection;

    fn connect(
        &self,
        addr: &str,
        _timeout: Duration,
        _use_mtls: bool,
    ) -> RemoteResult<MemoryConnection> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RemoteError::ConnectionRefused);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("memory service: connection from {}", addr);
        Ok(MemoryConnection {
            service: self.clone(),
        })
    }
}

/// A connection to a [`MemoryService`].
#[derive(Debug)]
pub struct MemoryConnection {
    service: MemoryService,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.service.lock()
    }

    fn file_mut<'s>(state: &'s mut State, file: FileToken) -> RemoteResult<&'s mut OpenFile> {
        // Stale or forged tokens: the service has nothing better than EIO.
        state.open_files.get_mut(&file.0).ok_or(RemoteError::Io)
    }
}

impl RpcConnection for MemoryConnection {
    fn disconnect(self) {
        self.service.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn stat(&self, path: &str) -> RemoteResult<RemoteStat> {
        let state = self.lock();
        let inode = state.lookup(&normalize(path))?;
        state.stat_of(inode)
    }

    fn fstat(&self, file: FileToken) -> RemoteResult<RemoteStat> {
        let mut state = self.lock();
        let inode = Self::file_mut(&mut state, file)?.inode;
        state.stat_of(inode)
    }

    fn mkdir(&self, path: &str, mode: u32) -> RemoteResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        if state.names.contains_key(&path) {
            return Err(RemoteError::Exists);
        }
        state.check_parent(&path)?;
        state.create_node(&path, Content::Dir, mode)?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> RemoteResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        let inode = state.lookup(&path)?;
        if !state.node(inode)?.is_dir() {
            return Err(RemoteError::NotDirectory);
        }
        if inode == ROOT_INODE {
            return Err(RemoteError::Permission);
        }
        if state.children(&path).next().is_some() {
            return Err(RemoteError::NotEmpty);
        }
        state.names.remove(&path);
        state.reap(inode);
        if let Ok(parent) = state.lookup(parent_of(&path)) {
            state.touch(parent);
        }
        Ok(())
    }

    fn unlink(&self, path: &str) -> RemoteResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        let inode = state.lookup(&path)?;
        if state.node(inode)?.is_dir() {
            return Err(RemoteError::IsDirectory);
        }
        state.names.remove(&path);
        state.reap(inode);
        if let Ok(parent) = state.lookup(parent_of(&path)) {
            state.touch(parent);
        }
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> RemoteResult<()> {
        let src = normalize(src);
        let dst = normalize(dst);
        let mut state = self.lock();
        let inode = state.lookup(&src)?;
        state.check_parent(&dst)?;
        if src == dst {
            return Ok(());
        }
        let src_is_dir = state.node(inode)?.is_dir();
        if src_is_dir && dst.starts_with(&format!("{src}/")) {
            return Err(RemoteError::Io);
        }

        if let Some(existing) = state.names.get(&dst).copied() {
            let dst_is_dir = state.node(existing)?.is_dir();
            match (src_is_dir, dst_is_dir) {
                (true, false) => return Err(RemoteError::NotDirectory),
                (false, true) => return Err(RemoteError::IsDirectory),
                (true, true) if state.children(&dst).next().is_some() => {
                    return Err(RemoteError::NotEmpty);
                }
                _ => {}
            }
            state.names.remove(&dst);
            state.reap(existing);
        }

        let prefix = format!("{src}/");
        let moved: Vec<(String, u64)> = state
            .names
            .iter()
            .filter(|(name, _)| **name == src || name.starts_with(&prefix))
            .map(|(name, inode)| (name.clone(), *inode))
            .collect();
        for (name, child) in moved {
            state.names.remove(&name);
            let renamed = format!("{dst}{}", &name[src.len()..]);
            state.names.insert(renamed, child);
        }
        state.touch(inode);
        Ok(())
    }

    fn statvfs(&self, path: &str) -> RemoteResult<RemoteStatVfs> {
        let state = self.lock();
        state.lookup(&normalize(path))?;
        let blocks_total = state.capacity / BLOCK_SIZE;
        let blocks_free = blocks_total.saturating_sub(state.used_blocks());
        Ok(RemoteStatVfs {
            block_size: BLOCK_SIZE,
            blocks_total,
            blocks_free,
            blocks_avail: blocks_free,
            files_total: state.max_files,
            files_free: state.max_files.saturating_sub(state.nodes.len() as u64),
        })
    }

    fn open(&self, path: &str, flags: i32, mode: u32) -> RemoteResult<FileToken> {
        let path = normalize(path);
        let access = flags & libc::O_ACCMODE;
        let readable = access == libc::O_RDONLY || access == libc::O_RDWR;
        let writable = access == libc::O_WRONLY || access == libc::O_RDWR;

        let mut state = self.lock();
        let inode = match state.names.get(&path).copied() {
            Some(_) if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 => {
                return Err(RemoteError::Exists);
            }
            Some(inode) => {
                let node = state.node_mut(inode)?;
                if node.is_dir() && writable {
                    return Err(RemoteError::IsDirectory);
                }
                if flags & libc::O_TRUNC != 0 && writable {
                    if let Content::File(data) = &mut node.content {
                        data.clear();
                    }
                }
                inode
            }
            None if flags & libc::O_CREAT != 0 => {
                state.check_parent(&path)?;
                state.create_node(&path, Content::File(Vec::new()), mode)?
            }
            None => return Err(RemoteError::NotFound),
        };

        let fh = state.next_fh;
        state.next_fh += 1;
        state.open_files.insert(
            fh,
            OpenFile {
                inode,
                pos: 0,
                readable,
                writable,
                append: flags & libc::O_APPEND != 0,
            },
        );
        Ok(FileToken(fh))
    }

    fn close(&self, file: FileToken) -> RemoteResult<()> {
        let mut state = self.lock();
        let open = state.open_files.remove(&file.0).ok_or(RemoteError::Io)?;
        state.reap(open.inode);
        Ok(())
    }

    fn read(&self, file: FileToken, offset: IoOffset, buf: &mut [u8]) -> RemoteResult<usize> {
        let mut state = self.lock();
        let open = Self::file_mut(&mut state, file)?;
        if !open.readable {
            return Err(RemoteError::Permission);
        }
        let (inode, start) = match offset {
            IoOffset::Current => (open.inode, open.pos),
            IoOffset::At(at) => (open.inode, at),
        };
        let node = state.node_mut(inode)?;
        let Content::File(data) = &node.content else {
            return Err(RemoteError::IsDirectory);
        };
        let len = data.len() as u64;
        if start >= len {
            return if buf.is_empty() {
                Ok(0)
            } else {
                Err(RemoteError::EndOfSequence)
            };
        }
        let from = usize::try_from(start).map_err(|_| RemoteError::Io)?;
        let n = buf.len().min(data.len() - from);
        buf[..n].copy_from_slice(&data[from..from + n]);
        node.atime = now_secs();
        if offset == IoOffset::Current {
            Self::file_mut(&mut state, file)?.pos = start + n as u64;
        }
        Ok(n)
    }

    fn write(&self, file: FileToken, offset: IoOffset, buf: &[u8]) -> RemoteResult<usize> {
        let mut state = self.lock();
        let open = Self::file_mut(&mut state, file)?;
        if !open.writable {
            return Err(RemoteError::Permission);
        }
        let inode = open.inode;
        let start = if open.append {
            state.node(inode)?.size()
        } else {
            match offset {
                IoOffset::Current => open.pos,
                IoOffset::At(at) => at,
            }
        };
        let n = state.write_at(inode, start, buf)?;
        if offset == IoOffset::Current {
            Self::file_mut(&mut state, file)?.pos = start + n as u64;
        }
        Ok(n)
    }

    fn fsync(&self, file: FileToken) -> RemoteResult<()> {
        let mut state = self.lock();
        Self::file_mut(&mut state, file).map(|_| ())
    }

    fn ftruncate(&self, file: FileToken, len: u64) -> RemoteResult<()> {
        let mut state = self.lock();
        let open = Self::file_mut(&mut state, file)?;
        if !open.writable {
            return Err(RemoteError::Permission);
        }
        let inode = open.inode;
        let current = state.node(inode)?.size();
        state.reserve(current, len)?;
        let len = usize::try_from(len).map_err(|_| RemoteError::NoSpace)?;
        let node = state.node_mut(inode)?;
        let Content::File(data) = &mut node.content else {
            return Err(RemoteError::IsDirectory);
        };
        data.resize(len, 0);
        let now = now_secs();
        node.mtime = now;
        node.ctime = now;
        Ok(())
    }

    fn opendir(&self, path: &str) -> RemoteResult<DirToken> {
        let path = normalize(path);
        let mut state = self.lock();
        let inode = state.lookup(&path)?;
        if !state.node(inode)?.is_dir() {
            return Err(RemoteError::NotDirectory);
        }
        let entries: Vec<RemoteDirEntry> = state
            .children(&path)
            .map(|(name, child)| RemoteDirEntry {
                inode: child,
                name: name.to_string(),
                is_dir: state.nodes.get(&child).is_some_and(Node::is_dir),
                is_symlink: false,
            })
            .collect();
        let dh = state.next_dh;
        state.next_dh += 1;
        state.open_dirs.insert(dh, DirCursor { entries, next: 0 });
        Ok(DirToken(dh))
    }

    fn readdir(&self, dir: DirToken, entry: &mut RemoteDirEntry) -> RemoteResult<()> {
        let mut state = self.lock();
        let cursor = state.open_dirs.get_mut(&dir.0).ok_or(RemoteError::Io)?;
        let Some(next) = cursor.entries.get(cursor.next) else {
            return Err(RemoteError::EndOfSequence);
        };
        entry.inode = next.inode;
        entry.name.push_str(&next.name);
        entry.is_dir = next.is_dir;
        entry.is_symlink = next.is_symlink;
        cursor.next += 1;
        Ok(())
    }

    fn closedir(&self, dir: DirToken) -> RemoteResult<()> {
        let mut state = self.lock();
        state
            .open_dirs
            .remove(&dir.0)
            .map(|_| ())
            .ok_or(RemoteError::Io)
    }
}
