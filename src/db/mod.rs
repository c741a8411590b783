//! Store lifecycle
//!
//! - `Db`: setup / teardown / log files for one node
//! - `EtcdDb`: installs and supervises etcd through a `NodeControl`
//! - `setup_all` / `teardown_all` / `with_cluster`: cluster-wide barrier helpers

pub mod cluster;
pub mod etcd;
pub mod probe;
pub mod traits;

pub use cluster::{setup_all, teardown_all, with_cluster, ClusterError};
pub use etcd::{etcd_args, EtcdDb};
pub use probe::{HttpHealthProbe, ReadinessProbe};
pub use traits::{DaemonHandle, Db, DbError};
