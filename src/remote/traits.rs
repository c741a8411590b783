//! Node control abstraction
//!
//! The lifecycle manager never touches a node directly; it asks a
//! `NodeControl` to install archives and supervise daemons on its behalf.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::topology::NodeId;

/// How to launch a supervised daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    /// Binary to execute
    pub binary: PathBuf,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Working directory
    pub working_dir: PathBuf,
    /// File receiving stdout and stderr (appended)
    pub log_file: PathBuf,
    /// File receiving the daemon's pid
    pub pid_file: PathBuf,
}

/// Errors raised by node control operations
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The local helper process (sh, ssh) could not be spawned
    #[error("failed to spawn command for {node}: {source}")]
    Spawn {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },
    /// The command ran but exited unsuccessfully
    #[error("command on {node} exited with {status}: {stderr}")]
    Failed {
        node: NodeId,
        status: String,
        stderr: String,
    },
}

/// Capabilities the lifecycle manager consumes on each node
#[async_trait]
pub trait NodeControl: Send + Sync {
    /// Fetch the archive at `url` and unpack it into `dir`
    async fn install_archive(&self, node: &NodeId, url: &str, dir: &Path)
        -> Result<(), RemoteError>;

    /// Launch a background daemon, recording its pid in `spec.pid_file`
    async fn start_daemon(&self, node: &NodeId, spec: &DaemonSpec) -> Result<(), RemoteError>;

    /// Kill the process recorded in `pid_file`.
    ///
    /// Must succeed when the pid file or the process is already gone.
    async fn stop_daemon(&self, node: &NodeId, pid_file: &Path) -> Result<(), RemoteError>;

    /// Recursively remove `dir`; succeeds when it does not exist
    async fn remove_dir(&self, node: &NodeId, dir: &Path) -> Result<(), RemoteError>;
}
