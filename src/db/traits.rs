//! Database lifecycle abstraction

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ClusterConfig;
use crate::remote::RemoteError;
use crate::topology::{ClusterTopology, NodeId};

/// Errors raised while bringing a node up or down
#[derive(Debug, Error)]
pub enum DbError {
    /// Node is not part of the topology it was asked to join
    #[error("node {0} is not a member of the topology")]
    UnknownNode(NodeId),
    /// Fetching or unpacking the store failed
    #[error("install failed on {node}: {source}")]
    Install {
        node: NodeId,
        #[source]
        source: RemoteError,
    },
    /// Launching the daemon failed
    #[error("launch failed on {node}: {source}")]
    Launch {
        node: NodeId,
        #[source]
        source: RemoteError,
    },
    /// The daemon never accepted client connections
    #[error("{node} not ready after {waited_ms}ms")]
    ReadinessTimeout { node: NodeId, waited_ms: u64 },
    /// Stopping the daemon or removing its files failed
    #[error("teardown failed on {node}: {source}")]
    Teardown {
        node: NodeId,
        #[source]
        source: RemoteError,
    },
}

impl DbError {
    /// Node the error refers to
    pub fn node(&self) -> &NodeId {
        match self {
            DbError::UnknownNode(node) => node,
            DbError::Install { node, .. }
            | DbError::Launch { node, .. }
            | DbError::ReadinessTimeout { node, .. }
            | DbError::Teardown { node, .. } => node,
        }
    }
}

/// Files owned by one node's daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonHandle {
    /// Daemon output
    pub log_file: PathBuf,
    /// Daemon pid
    pub pid_file: PathBuf,
    /// Directory holding the binary and the two files above
    pub install_dir: PathBuf,
}

impl DaemonHandle {
    /// Handle for the fixed layout described by `config`
    pub fn from_config(config: &ClusterConfig) -> Self {
        DaemonHandle {
            log_file: config.log_path(),
            pid_file: config.pid_path(),
            install_dir: config.install_dir.clone(),
        }
    }
}

/// Lifecycle of a replicated store on a set of nodes
#[async_trait]
pub trait Db: Send + Sync {
    /// Install, launch and wait for `node`. No retries.
    async fn setup(&self, node: &NodeId, topology: &ClusterTopology) -> Result<(), DbError>;

    /// Stop the daemon and remove its files.
    ///
    /// Safe to call on a node that was never (or only partly) set up.
    async fn teardown(&self, node: &NodeId) -> Result<(), DbError>;

    /// Log files worth collecting from `node`; they may not exist
    fn log_files(&self, node: &NodeId) -> Vec<PathBuf>;
}
