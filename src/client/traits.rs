//! Client abstractions
//!
//! `KvStore` is the raw store capability (quorum get, set, compare-and-swap).
//! `Client` is what the harness drives: it turns register operations into
//! store calls and never fails, classifying every result instead.

use async_trait::async_trait;
use thiserror::Error;

use crate::op::{ErrorKind, Operation, OutcomeRecord, Value};
use crate::topology::NodeId;

/// Errors returned by store primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The request did not complete within the client timeout
    #[error("request timed out")]
    Timeout,
    /// The store reported that the key does not exist
    #[error("key not found")]
    NotFound,
    /// The node could not be reached
    #[error("connection failed: {0}")]
    Connection(String),
    /// The store answered with an error
    #[error("store error {code:?}: {message}")]
    Rejected { code: Option<u64>, message: String },
    /// The store's answer could not be parsed
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<StoreError> for ErrorKind {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => ErrorKind::Timeout,
            StoreError::NotFound => ErrorKind::NotFound,
            StoreError::Connection(msg) => ErrorKind::Connection(msg),
            StoreError::Rejected { code, message } => ErrorKind::Rejected { code, message },
            StoreError::Decode(msg) => ErrorKind::Decode(msg),
        }
    }
}

/// Errors raised while opening a connection
#[derive(Debug, Error)]
pub enum ClientError {
    /// No endpoint is known for the node
    #[error("no client endpoint for node {0}")]
    UnknownNode(NodeId),
    /// The underlying client could not be built
    #[error("failed to build client for {node}: {reason}")]
    Build { node: NodeId, reason: String },
}

/// Register primitives offered by the store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Quorum-consistent read; `Ok(None)` when the key holds no value
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Unconditional write
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Write `new` only if the key currently holds `expected`.
    ///
    /// `Ok(false)` means the store evaluated the condition and it did not hold.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
    ) -> Result<bool, StoreError>;
}

/// Builds a store handle bound to one node
pub trait StoreConnector: Send + Sync {
    /// Store handle type
    type Store: KvStore;

    /// Bind a store handle to `node`; no network traffic, no retries
    fn connect(&self, node: &NodeId) -> Result<Self::Store, ClientError>;
}

/// Register client driven by the harness
#[async_trait]
pub trait Client: Send + Sync {
    /// Per-worker connection
    type Connection: Send + Sync;

    /// Open a connection to `node`
    async fn open(&self, node: &NodeId) -> Result<Self::Connection, ClientError>;

    /// Run one operation and classify its outcome; never fails
    async fn invoke(&self, conn: &Self::Connection, op: &Operation) -> OutcomeRecord;

    /// Release the connection
    async fn close(&self, conn: Self::Connection);
}
