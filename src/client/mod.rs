//! Register client layer
//!
//! - `RegisterClient`: classifies store results into ok / fail / info
//! - `EtcdConnector`: etcd v2 keys API over HTTP
//! - `MemoryCluster`: in-memory store with fault injection, for tests

pub mod etcd_http;
pub mod memory;
pub mod register;
pub mod traits;

pub use etcd_http::{EtcdConnector, EtcdHttpStore};
pub use memory::{Fault, MemoryCluster, MemoryStore};
pub use register::{classify, RegisterClient, RegisterConnection, Reply};
pub use traits::{Client, ClientError, KvStore, StoreConnector, StoreError};
