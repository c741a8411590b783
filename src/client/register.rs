//! Register client adapter
//!
//! Translates register operations into store calls and classifies each
//! result. A read has no side effect, so any error fails it outright. A write
//! or CAS that errors without a definite answer from the store may still have
//! been applied, so it is reported as indeterminate (`info`) instead.

use async_trait::async_trait;

use super::{Client, ClientError, KvStore, StoreConnector, StoreError};
use crate::namespace::KeyNamespace;
use crate::op::{ErrorKind, OpKind, Operation, OutcomeRecord, Value};
use crate::topology::NodeId;

/// Raw answer from the store for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Read result; `None` when the key holds no value
    Read(Option<Value>),
    /// Write acknowledged
    Written,
    /// CAS evaluated; `false` when the precondition did not hold
    Swapped(bool),
}

/// Classify a store reply for an operation of `kind`
pub fn classify(kind: &OpKind, reply: Result<Reply, StoreError>) -> OutcomeRecord {
    match reply {
        Ok(Reply::Read(value)) => OutcomeRecord::read_ok(value.into()),
        Ok(Reply::Written) | Ok(Reply::Swapped(true)) => OutcomeRecord::ok(),
        Ok(Reply::Swapped(false)) => OutcomeRecord::fail(None),
        Err(StoreError::NotFound) => OutcomeRecord::fail(Some(ErrorKind::NotFound)),
        Err(e) if kind.is_mutating() => OutcomeRecord::info(e.into()),
        Err(e) => OutcomeRecord::fail(Some(e.into())),
    }
}

/// One worker's connection to one node
#[derive(Debug)]
pub struct RegisterConnection<S> {
    node: NodeId,
    store: S,
}

impl<S> RegisterConnection<S> {
    /// Node this connection talks to
    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

/// Register client over any `StoreConnector`
#[derive(Debug, Clone)]
pub struct RegisterClient<C> {
    connector: C,
    namespace: KeyNamespace,
}

impl<C: StoreConnector> RegisterClient<C> {
    /// Client storing registers under their logical keys
    pub fn new(connector: C) -> Self {
        Self::with_namespace(connector, KeyNamespace::Identity)
    }

    /// Client storing registers under `namespace`
    pub fn with_namespace(connector: C, namespace: KeyNamespace) -> Self {
        RegisterClient {
            connector,
            namespace,
        }
    }

    async fn call(store: &C::Store, key: &str, kind: &OpKind) -> Result<Reply, StoreError> {
        match *kind {
            OpKind::Read => store.get(key).await.map(Reply::Read),
            OpKind::Write { value } => store.set(key, value).await.map(|()| Reply::Written),
            OpKind::Cas { expected, new } => store
                .compare_and_swap(key, expected, new)
                .await
                .map(Reply::Swapped),
        }
    }
}

#[async_trait]
impl<C: StoreConnector> Client for RegisterClient<C> {
    type Connection = RegisterConnection<C::Store>;

    async fn open(&self, node: &NodeId) -> Result<Self::Connection, ClientError> {
        let store = self.connector.connect(node)?;
        Ok(RegisterConnection {
            node: node.clone(),
            store,
        })
    }

    async fn invoke(&self, conn: &Self::Connection, op: &Operation) -> OutcomeRecord {
        let key = self.namespace.physical_key(op.key);
        let reply = Self::call(&conn.store, &key, &op.kind).await;
        let outcome = classify(&op.kind, reply);
        tracing::debug!(
            node = %conn.node,
            key = %key,
            op = ?op.kind,
            status = ?outcome.status,
            error = ?outcome.error,
            "invoked"
        );
        outcome
    }

    async fn close(&self, conn: Self::Connection) {
        tracing::trace!(node = %conn.node, "closing connection");
    }
}
