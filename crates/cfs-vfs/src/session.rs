//! Per-connection session state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::{RemoteError, RemoteResult, VfsError, VfsResult};
use crate::path::PathBuilder;
use crate::rpc::{RpcConnection, RpcConnector};

/// Cumulative counters for a session. Observability only.
#[derive(Debug, Default)]
pub struct SessionStats {
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    rpc_calls: AtomicU64,
    rpc_errors: AtomicU64,
}

impl SessionStats {
    pub(crate) fn add_read(&self, n: usize) {
        self.read_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self, n: usize) {
        self.write_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn add_call(&self) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn add_error(&self) {
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            rpc_calls: self.rpc_calls.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Bytes read.
    pub read_bytes: u64,
    /// Bytes written.
    pub write_bytes: u64,
    /// RPC calls issued.
    pub rpc_calls: u64,
    /// RPC calls that failed.
    pub rpc_errors: u64,
}

/// One host connection bound to one remote RPC connection.
///
/// Operations (see `ops.rs`) take `&self`; the only mutation is
/// [`Session::disconnect`]. Dropping a session disconnects it.
pub struct Session<C: RpcConnection> {
    config: SessionConfig,
    paths: PathBuilder,
    conn: Option<C>,
    stats: SessionStats,
}

impl<C: RpcConnection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("connected", &self.conn.is_some())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl<C: RpcConnection> Session<C> {
    /// Establish the RPC connection and create the session.
    ///
    /// On failure no session exists; the remote error is returned translated.
    pub fn connect<R>(connector: &R, config: SessionConfig) -> VfsResult<Self>
    where
        R: RpcConnector<Connection = C>,
    {
        let conn = connector
            .connect(&config.server, config.timeout, config.mtls)
            .map_err(|e| {
                let err = VfsError::from(e);
                tracing::warn!("cfs_vfs: failed to connect to {}: {}", config.server, err);
                err
            })?;

        tracing::debug!(
            "cfs_vfs: connected to {}, export={}",
            config.server,
            config.export
        );

        Ok(Self {
            paths: PathBuilder::new(&config.export),
            config,
            conn: Some(conn),
            stats: SessionStats::default(),
        })
    }

    /// Release the RPC connection.
    ///
    /// Never fails and is idempotent: the connection is released exactly once,
    /// later calls only return the counters.
    pub fn disconnect(&mut self) -> StatsSnapshot {
        let stats = self.stats.snapshot();
        if let Some(conn) = self.conn.take() {
            tracing::info!(
                server = %self.config.server,
                read_bytes = stats.read_bytes,
                write_bytes = stats.write_bytes,
                rpc_calls = stats.rpc_calls,
                rpc_errors = stats.rpc_errors,
                "cfs_vfs: disconnecting"
            );
            conn.disconnect();
        }
        stats
    }

    /// Whether the RPC connection is still held.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &SessionStats {
        &self.stats
    }

    /// Compose the remote path for a host-relative path.
    pub fn remote_path(&self, relative: &str) -> VfsResult<String> {
        self.paths.build(relative)
    }

    /// Issue one round trip and hand back the raw remote outcome.
    ///
    /// The call is counted; failures are not, so callers can treat sentinel
    /// outcomes such as end-of-sequence specially before calling
    /// [`Session::fail`].
    pub(crate) fn round_trip<T>(
        &self,
        f: impl FnOnce(&C) -> RemoteResult<T>,
    ) -> VfsResult<RemoteResult<T>> {
        let conn = self.conn.as_ref().ok_or(VfsError::NotConnected)?;
        self.stats.add_call();
        Ok(f(conn))
    }

    /// Count and translate a failed round trip.
    pub(crate) fn fail(&self, op: &'static str, err: RemoteError) -> VfsError {
        self.stats.add_error();
        let local = VfsError::from(err);
        tracing::debug!("cfs_vfs: {} failed: {} ({})", op, local, err);
        local
    }

    /// Issue one round trip, counting and translating failures.
    pub(crate) fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&C) -> RemoteResult<T>,
    ) -> VfsResult<T> {
        self.round_trip(f)?.map_err(|e| self.fail(op, e))
    }
}

impl<C: RpcConnection> Drop for Session<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
