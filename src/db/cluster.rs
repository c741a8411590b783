//! Whole-cluster setup and teardown
//!
//! Setup fans out to every node concurrently and only succeeds once all of
//! them are ready. Teardown always visits every node.

use std::future::Future;

use futures::future::join_all;
use thiserror::Error;

use super::{Db, DbError};
use crate::topology::ClusterTopology;

/// One or more nodes failed a cluster-wide step
#[derive(Debug, Error)]
#[error("{} of {total} nodes failed: {}", .failures.len(), summarize(.failures))]
pub struct ClusterError {
    /// Nodes involved in the step
    pub total: usize,
    /// Per-node failures
    pub failures: Vec<DbError>,
}

fn summarize(failures: &[DbError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Set up every node concurrently; Ok only when every node is ready
pub async fn setup_all<D: Db + ?Sized>(
    db: &D,
    topology: &ClusterTopology,
) -> Result<(), ClusterError> {
    let results = join_all(topology.nodes().map(|node| db.setup(node, topology))).await;
    collect(topology.len(), results)
}

/// Tear down every node, even when some of them fail
pub async fn teardown_all<D: Db + ?Sized>(
    db: &D,
    topology: &ClusterTopology,
) -> Result<(), ClusterError> {
    let results = join_all(topology.nodes().map(|node| db.teardown(node))).await;
    collect(topology.len(), results)
}

/// Run `body` against a ready cluster, tearing it down afterwards no matter what.
///
/// A setup failure skips `body` but still tears down every node.
pub async fn with_cluster<D, F, Fut, T>(
    db: &D,
    topology: &ClusterTopology,
    body: F,
) -> Result<T, ClusterError>
where
    D: Db + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let outcome = match setup_all(db, topology).await {
        Ok(()) => Ok(body().await),
        Err(e) => Err(e),
    };

    if let Err(e) = teardown_all(db, topology).await {
        tracing::warn!(error = %e, "teardown incomplete");
        if outcome.is_ok() {
            return Err(e);
        }
    }
    outcome
}

fn collect(total: usize, results: Vec<Result<(), DbError>>) -> Result<(), ClusterError> {
    let failures: Vec<DbError> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ClusterError { total, failures })
    }
}
