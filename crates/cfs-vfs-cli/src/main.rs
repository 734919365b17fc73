//! cfs-vfs - probe a ClaudeFS export through the VFS adapter
//!
//! Opens one session the way a file-server host would and runs a single
//! command against it. Useful for smoke testing a deployment's settings.
//!
//! Usage:
//!   cfs-vfs --server cfs-node1:9400 --export /data probe
//!   cfs-vfs --config session.json ls -l reports
//!   cfs-vfs --backend memory --seed ./fixtures cat hello.txt

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod commands;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cfs_vfs::{MemoryService, RpcConnection, RpcConnector, Session, SessionConfig};

/// Probe a ClaudeFS export through the file-server VFS adapter
#[derive(Parser, Debug)]
#[command(name = "cfs-vfs", version)]
#[command(about = "Run one VFS operation against a ClaudeFS export")]
struct Args {
    /// JSON session config (`server`, `export`, `timeout_ms`, `mtls`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server address, overrides the config file
    #[arg(long)]
    server: Option<String>,

    /// Export root, overrides the config file
    #[arg(long)]
    export: Option<String>,

    /// RPC timeout in milliseconds, overrides the config file
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Disable mTLS
    #[arg(long)]
    no_mtls: bool,

    /// RPC client to use
    #[arg(long, value_enum, default_value_t = Backend::default())]
    backend: Backend,

    /// Local directory copied under the export root (memory backend only)
    #[arg(long)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// In-process loopback service
    Memory,
    /// Native libcfsrpc client
    Native,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "cfsrpc") {
            Self::Native
        } else {
            Self::Memory
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stat record of a path
    Stat {
        /// Path relative to the export root
        path: String,
    },
    /// List a directory
    Ls {
        /// Directory relative to the export root
        #[arg(default_value = "")]
        path: String,
        /// Show kind and inode
        #[arg(short, long)]
        long: bool,
    },
    /// Print a file's contents
    Cat {
        /// Path relative to the export root
        path: String,
    },
    /// Report free space
    Df {
        /// Path relative to the export root
        #[arg(default_value = "")]
        path: String,
    },
    /// Stat and statvfs the export root, then print session counters
    Probe,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    tracing::debug!(?config, "resolved session config");

    match args.backend {
        Backend::Memory => {
            let service = MemoryService::new();
            service
                .seed_dirs(config.export.as_str())
                .context("creating export root")?;
            if let Some(seed) = &args.seed {
                let files = seed_tree(&service, seed, config.export.as_str())?;
                tracing::info!("seeded {} files from {}", files, seed.display());
            }
            run(&service, config, args.command)
        }
        Backend::Native => run_native(config, args.command),
    }
}

#[cfg(feature = "cfsrpc")]
fn run_native(config: SessionConfig, command: Command) -> Result<()> {
    run(&cfs_vfs::ffi::CfsRpcConnector, config, command)
}

#[cfg(not(feature = "cfsrpc"))]
fn run_native(_config: SessionConfig, _command: Command) -> Result<()> {
    anyhow::bail!("cfs-vfs was built without the `cfsrpc` feature")
}

fn run<R, C>(connector: &R, config: SessionConfig, command: Command) -> Result<()>
where
    R: RpcConnector<Connection = C>,
    C: RpcConnection,
{
    let server = config.server.clone();
    let session =
        Session::connect(connector, config).with_context(|| format!("connecting to {server}"))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Stat { path } => commands::stat(&session, &path, &mut out)?,
        Command::Ls { path, long } => {
            commands::ls(&session, &path, long, &mut out)?;
        }
        Command::Cat { path } => {
            commands::cat(&session, &path, &mut out)?;
        }
        Command::Df { path } => commands::df(&session, &path, &mut out)?,
        Command::Probe => commands::probe(session, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

/// Layer a config file and command-line overrides over the defaults.
fn resolve_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SessionConfig::default(),
    };

    if let Some(server) = &args.server {
        config.server.clone_from(server);
    }
    if let Some(export) = &args.export {
        config.export = export.clone().try_into()?;
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if args.no_mtls {
        config.mtls = false;
    }
    Ok(config)
}

/// Copy a local directory tree into the memory service under `root`.
fn seed_tree(service: &MemoryService, local: &Path, root: &str) -> Result<usize> {
    let mut files = 0;
    for entry in fs::read_dir(local).with_context(|| format!("reading {}", local.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!("skipping non-UTF-8 name {:?}", name);
            continue;
        };
        let remote = format!("{}/{}", root.trim_end_matches('/'), name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            service.seed_dirs(&remote)?;
            files += seed_tree(service, &entry.path(), &remote)?;
        } else if file_type.is_file() {
            service.seed_file(&remote, &fs::read(entry.path())?)?;
            files += 1;
        }
    }
    Ok(files)
}
