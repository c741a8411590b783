//! Cluster topology
//!
//! Pure derivation of per-node addresses and the founding membership
//! descriptor from the node set. Every node recomputes the descriptor during
//! its own setup, so the node set is kept ordered: the same input set always
//! renders the same string, whatever order the nodes were supplied in.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, ConfigError};

/// Identity (hostname) of a cluster member
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node identity from a hostname
    pub fn new(name: impl Into<String>) -> Self {
        NodeId(name.into())
    }

    /// Hostname of this node
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        NodeId::new(name)
    }
}

/// Immutable view of the cluster's nodes and their addresses
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTopology {
    nodes: BTreeSet<NodeId>,
    peer_port: u16,
    client_port: u16,
}

impl ClusterTopology {
    /// Build a topology for `nodes` using the ports from `config`.
    ///
    /// Duplicate identities collapse into one member.
    pub fn new<I>(nodes: I, config: &ClusterConfig) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = NodeId>,
    {
        if config.peer_port == config.client_port {
            return Err(ConfigError::PortCollision(config.peer_port));
        }
        let nodes: BTreeSet<NodeId> = nodes.into_iter().collect();
        if nodes.is_empty() {
            return Err(ConfigError::EmptyNodeSet);
        }
        Ok(ClusterTopology {
            nodes,
            peer_port: config.peer_port,
            client_port: config.client_port,
        })
    }

    /// Members in descriptor order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a constructed topology
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` is a member
    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    /// URL replicas use to reach `node`
    pub fn peer_address(&self, node: &NodeId) -> String {
        format!("http://{}:{}", node, self.peer_port)
    }

    /// URL clients use to reach `node`
    pub fn client_address(&self, node: &NodeId) -> String {
        format!("http://{}:{}", node, self.client_port)
    }

    /// The `--initial-cluster` value: `name=peer-url` pairs, comma separated
    pub fn membership_descriptor(&self) -> String {
        self.nodes
            .iter()
            .map(|node| format!("{}={}", node, self.peer_address(node)))
            .collect::<Vec<_>>()
            .join(",")
    }
}
