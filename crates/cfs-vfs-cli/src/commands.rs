//! Probe commands run against an open session.

use std::io::{self, Write};

use anyhow::{Context, Result};
use cfs_vfs::{DirEntry, FileKind, RpcConnection, Session};

const READ_CHUNK: usize = 64 * 1024;

/// Print the stat record for `path` as JSON.
pub fn stat<C: RpcConnection>(
    session: &Session<C>,
    path: &str,
    out: &mut impl Write,
) -> Result<()> {
    let st = session.stat(path).with_context(|| format!("stat {path}"))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&st)?)?;
    Ok(())
}

/// List a directory, one entry per line.
pub fn ls<C: RpcConnection>(
    session: &Session<C>,
    path: &str,
    long: bool,
    out: &mut impl Write,
) -> Result<usize> {
    let mut dir = session
        .opendir(path)
        .with_context(|| format!("opendir {path}"))?;
    let mut count = 0;
    let outcome: Result<usize> = loop {
        match session.readdir(&mut dir, None) {
            Ok(Some(entry)) => {
                if let Err(err) = write_entry(out, entry, long) {
                    break Err(err.into());
                }
                count += 1;
            }
            Ok(None) => break Ok(count),
            Err(err) => break Err(anyhow::Error::from(err).context(format!("readdir {path}"))),
        }
    };
    session.closedir(dir);
    outcome
}

fn write_entry(out: &mut impl Write, entry: &DirEntry, long: bool) -> io::Result<()> {
    if !long {
        return writeln!(out, "{}", entry.name());
    }
    let kind = match entry.kind() {
        FileKind::Directory => 'd',
        FileKind::Symlink => 'l',
        FileKind::Regular => '-',
    };
    writeln!(out, "{kind} {:>10} {}", entry.ino(), entry.name())
}

/// Copy a file's contents to `out`.
pub fn cat<C: RpcConnection>(
    session: &Session<C>,
    path: &str,
    out: &mut impl Write,
) -> Result<u64> {
    let file = session
        .open(path, libc::O_RDONLY, 0)
        .with_context(|| format!("open {path}"))?;
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    let outcome: Result<u64> = loop {
        match session.read(&file, &mut buf) {
            Ok(0) => break Ok(total),
            Ok(n) => {
                if let Err(err) = out.write_all(&buf[..n]) {
                    break Err(err.into());
                }
                total += n as u64;
            }
            Err(err) => break Err(anyhow::Error::from(err).context(format!("read {path}"))),
        }
    };
    session.close(file);
    outcome
}

/// Report free space, or `unavailable`.
pub fn df<C: RpcConnection>(
    session: &Session<C>,
    path: &str,
    out: &mut impl Write,
) -> Result<()> {
    match session.disk_free(path) {
        Some(usage) => writeln!(
            out,
            "block_size={} total={} free={}",
            usage.block_size, usage.total_blocks, usage.free_blocks
        )?,
        None => writeln!(out, "unavailable")?,
    }
    Ok(())
}

/// Exercise the connection end to end and print the session counters.
pub fn probe<C: RpcConnection>(mut session: Session<C>, out: &mut impl Write) -> Result<()> {
    let root = session.stat("").context("stat export root")?;
    anyhow::ensure!(root.is_dir(), "export root is not a directory");
    let vfs = session.statvfs("").context("statvfs export root")?;
    tracing::info!(
        export = %session.config().export,
        blocks_free = vfs.blocks_free,
        "probe: export reachable"
    );
    let stats = session.disconnect();
    writeln!(out, "{}", serde_json::to_string(&stats)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use cfs_vfs::{MemoryConnection, MemoryService, SessionConfig, StatsSnapshot};

    use super::*;

    fn session(service: &MemoryService) -> Session<MemoryConnection> {
        service.seed_dirs("/srv").unwrap();
        let config = SessionConfig::from_params([("export", "/srv")]).unwrap();
        Session::connect(service, config).unwrap()
    }

    #[test]
    fn test_ls_long_format() {
        let service = MemoryService::new();
        service.seed_file("/srv/b.txt", b"b").unwrap();
        service.seed_dirs("/srv/a").unwrap();
        let session = session(&service);

        let mut out = Vec::new();
        assert_eq!(ls(&session, "", true, &mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].starts_with("d "));
        assert!(lines[0].ends_with(" a"));
        assert!(lines[1].starts_with("- "));
        assert!(lines[1].ends_with(" b.txt"));
        assert_eq!(service.open_dir_count(), 0);
    }

    #[test]
    fn test_cat_streams_whole_file() {
        let service = MemoryService::new();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        service.seed_file("/srv/big", &data).unwrap();
        let session = session(&service);

        let mut out = Vec::new();
        assert_eq!(cat(&session, "big", &mut out).unwrap(), data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(service.open_file_count(), 0);
    }

    #[test]
    fn test_stat_missing_path_has_context() {
        let service = MemoryService::new();
        let session = session(&service);
        let err = stat(&session, "nope", &mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "stat nope");
        assert_eq!(
            err.downcast_ref::<cfs_vfs::VfsError>(),
            Some(&cfs_vfs::VfsError::NotFound)
        );
    }

    #[test]
    fn test_df() {
        let service = MemoryService::with_capacity(8 * 4096);
        let session = session(&service);
        let mut out = Vec::new();
        df(&session, "", &mut out).unwrap();
        df(&session, "missing", &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "block_size=4096 total=8 free=8\nunavailable\n"
        );
    }

    #[test]
    fn test_probe_reports_counters() {
        let service = MemoryService::new();
        let session = session(&service);
        let mut out = Vec::new();
        probe(session, &mut out).unwrap();
        let stats: StatsSnapshot = serde_json::from_slice(&out).unwrap();
        assert_eq!(stats.rpc_calls, 2);
        assert_eq!(stats.rpc_errors, 0);
        assert_eq!(service.release_count(), 1);
    }
}
