//! etcd register testing harness
//!
//! Brings up an etcd cluster on a fixed set of nodes and exposes
//! read / write / compare-and-swap register semantics over it, classifying
//! every result as ok, fail, or info (indeterminate) for an external
//! linearizability checker.

pub mod client;
pub mod config;
pub mod db;
pub mod history;
pub mod namespace;
pub mod op;
pub mod remote;
pub mod topology;

/// Testing utilities for integration tests.
pub mod testing;

pub use client::{Client, RegisterClient};
pub use config::{ClusterConfig, ConfigError};
pub use db::{Db, EtcdDb};
pub use namespace::KeyNamespace;
pub use op::{ErrorKind, Observed, Operation, OutcomeRecord, Status};
pub use topology::{ClusterTopology, NodeId};
