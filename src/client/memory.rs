//! In-memory store for testing
//!
//! One shared map stands in for the whole replicated cluster, so a write on
//! one node's connection is visible to a quorum read on any other. Faults can
//! be injected cluster-wide or per node.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ClientError, KvStore, StoreConnector, StoreError};
use crate::op::Value;
use crate::topology::NodeId;

/// Failure injected into store calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Time out without touching the data
    Timeout,
    /// Apply the operation, then time out before answering
    TimeoutAfterApply,
    /// Refuse the connection
    Connection,
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<String, Value>,
    cluster_fault: Option<Fault>,
    node_faults: HashMap<NodeId, Fault>,
}

/// Shared in-memory cluster; also the connector for its stores
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a storage key directly
    pub fn put(&self, key: &str, value: Value) {
        self.inner.lock().data.insert(key.to_string(), value);
    }

    /// Current value of a storage key
    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner.lock().data.get(key).copied()
    }

    /// Make every call on every node fail with `fault`
    pub fn inject(&self, fault: Fault) {
        self.inner.lock().cluster_fault = Some(fault);
    }

    /// Make every call on `node` fail with `fault`
    pub fn inject_on(&self, node: NodeId, fault: Fault) {
        self.inner.lock().node_faults.insert(node, fault);
    }

    /// Remove all injected faults
    pub fn heal(&self) {
        let mut inner = self.inner.lock();
        inner.cluster_fault = None;
        inner.node_faults.clear();
    }
}

impl StoreConnector for MemoryCluster {
    type Store = MemoryStore;

    fn connect(&self, node: &NodeId) -> Result<MemoryStore, ClientError> {
        Ok(MemoryStore {
            node: node.clone(),
            cluster: self.clone(),
        })
    }
}

/// One node's view of a `MemoryCluster`
#[derive(Debug, Clone)]
pub struct MemoryStore {
    node: NodeId,
    cluster: MemoryCluster,
}

impl MemoryStore {
    /// Run `apply` against the data unless a fault says otherwise
    fn with_data<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<String, Value>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.cluster.inner.lock();
        let fault = inner
            .node_faults
            .get(&self.node)
            .copied()
            .or(inner.cluster_fault);

        match fault {
            None => apply(&mut inner.data),
            Some(Fault::Timeout) => Err(StoreError::Timeout),
            Some(Fault::TimeoutAfterApply) => {
                let _ = apply(&mut inner.data);
                Err(StoreError::Timeout)
            }
            Some(Fault::Connection) => Err(StoreError::Connection(format!(
                "connection to {} refused",
                self.node
            ))),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.with_data(|data| Ok(data.get(key).copied()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.with_data(|data| {
            data.insert(key.to_string(), value);
            Ok(())
        })
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
    ) -> Result<bool, StoreError> {
        self.with_data(|data| match data.get_mut(key) {
            None => Err(StoreError::NotFound),
            Some(current) if *current == expected => {
                *current = new;
                Ok(true)
            }
            Some(_) => Ok(false),
        })
    }
}
