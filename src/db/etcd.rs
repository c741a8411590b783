//! etcd lifecycle manager
//!
//! Installs the etcd release on each node, launches it with flags derived
//! from the topology, and polls it until it accepts clients.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use super::{DaemonHandle, Db, DbError, ReadinessProbe};
use crate::config::ClusterConfig;
use crate::remote::{DaemonSpec, NodeControl};
use crate::topology::{ClusterTopology, NodeId};

/// Startup flags for `node`: one flag per derived or identity value
pub fn etcd_args(node: &NodeId, topology: &ClusterTopology) -> Vec<String> {
    let peer = topology.peer_address(node);
    let client = topology.client_address(node);
    [
        ("--log-output", "stderr".to_string()),
        ("--name", node.to_string()),
        ("--listen-peer-urls", peer.clone()),
        ("--listen-client-urls", client.clone()),
        ("--advertise-client-urls", client),
        ("--initial-cluster-state", "new".to_string()),
        ("--initial-advertise-peer-urls", peer),
        ("--initial-cluster", topology.membership_descriptor()),
    ]
    .into_iter()
    .flat_map(|(flag, value)| [flag.to_string(), value])
    .collect()
}

/// Lifecycle manager for an etcd cluster
pub struct EtcdDb<C, P> {
    config: Arc<ClusterConfig>,
    control: C,
    probe: P,
    /// Handles of nodes set up by this manager and not yet torn down
    handles: Mutex<HashMap<NodeId, DaemonHandle>>,
}

impl<C: NodeControl, P: ReadinessProbe> EtcdDb<C, P> {
    /// Create a manager driving nodes through `control` and `probe`
    pub fn new(config: Arc<ClusterConfig>, control: C, probe: P) -> Self {
        EtcdDb {
            config,
            control,
            probe,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Handle of a node that is currently set up
    pub fn handle(&self, node: &NodeId) -> Option<DaemonHandle> {
        self.handles.lock().get(node).cloned()
    }

    fn daemon_spec(&self, node: &NodeId, topology: &ClusterTopology) -> DaemonSpec {
        DaemonSpec {
            binary: self.config.binary_path(),
            args: etcd_args(node, topology),
            working_dir: self.config.install_dir.clone(),
            log_file: self.config.log_path(),
            pid_file: self.config.pid_path(),
        }
    }

    /// Poll until the node accepts clients or the readiness deadline passes
    async fn wait_until_ready(&self, node: &NodeId, client_url: &str) -> Result<(), DbError> {
        let started = Instant::now();
        let deadline = started + self.config.readiness_timeout;

        loop {
            if self.probe.is_ready(client_url).await {
                tracing::info!(
                    node = %node,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "etcd ready"
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DbError::ReadinessTimeout {
                    node: node.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            sleep(self.config.readiness_poll_interval).await;
        }
    }
}

#[async_trait]
impl<C: NodeControl, P: ReadinessProbe> Db for EtcdDb<C, P> {
    async fn setup(&self, node: &NodeId, topology: &ClusterTopology) -> Result<(), DbError> {
        if !topology.contains(node) {
            return Err(DbError::UnknownNode(node.clone()));
        }

        let url = self.config.resolved_archive_url();
        tracing::info!(node = %node, version = %self.config.version, "installing etcd");
        self.control
            .install_archive(node, &url, &self.config.install_dir)
            .await
            .map_err(|source| DbError::Install {
                node: node.clone(),
                source,
            })?;

        // Registered before launch so a failed launch still gets cleaned up
        self.handles
            .lock()
            .insert(node.clone(), DaemonHandle::from_config(&self.config));

        let spec = self.daemon_spec(node, topology);
        tracing::info!(node = %node, "launching etcd");
        self.control
            .start_daemon(node, &spec)
            .await
            .map_err(|source| DbError::Launch {
                node: node.clone(),
                source,
            })?;

        self.wait_until_ready(node, &topology.client_address(node))
            .await
    }

    async fn teardown(&self, node: &NodeId) -> Result<(), DbError> {
        let handle = self
            .handle(node)
            .unwrap_or_else(|| DaemonHandle::from_config(&self.config));

        tracing::info!(node = %node, "tearing down etcd");
        self.control
            .stop_daemon(node, &handle.pid_file)
            .await
            .map_err(|source| DbError::Teardown {
                node: node.clone(),
                source,
            })?;
        self.control
            .remove_dir(node, &handle.install_dir)
            .await
            .map_err(|source| DbError::Teardown {
                node: node.clone(),
                source,
            })?;

        self.handles.lock().remove(node);
        Ok(())
    }

    fn log_files(&self, node: &NodeId) -> Vec<PathBuf> {
        let handle = self
            .handle(node)
            .unwrap_or_else(|| DaemonHandle::from_config(&self.config));
        vec![handle.log_file]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ControlCall, FakeControl, StaticProbe};
    use std::time::Duration;

    fn topology() -> ClusterTopology {
        ClusterTopology::new(
            ["n1", "n2", "n3"].into_iter().map(NodeId::from),
            &ClusterConfig::default(),
        )
        .unwrap()
    }

    fn db(control: FakeControl, probe: StaticProbe) -> EtcdDb<FakeControl, StaticProbe> {
        let config = ClusterConfig::default()
            .with_readiness(Duration::from_secs(2), Duration::from_millis(100));
        EtcdDb::new(Arc::new(config), control, probe)
    }

    #[test]
    fn test_args_cover_every_startup_option() {
        let topo = topology();
        let args = etcd_args(&NodeId::from("n2"), &topo);

        let value_of = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };

        assert_eq!(args.len(), 16);
        assert_eq!(value_of("--log-output"), "stderr");
        assert_eq!(value_of("--name"), "n2");
        assert_eq!(value_of("--listen-peer-urls"), "http://n2:2380");
        assert_eq!(value_of("--listen-client-urls"), "http://n2:2379");
        assert_eq!(value_of("--advertise-client-urls"), "http://n2:2379");
        assert_eq!(value_of("--initial-cluster-state"), "new");
        assert_eq!(value_of("--initial-advertise-peer-urls"), "http://n2:2380");
        assert_eq!(value_of("--initial-cluster"), topo.membership_descriptor());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_installs_launches_and_waits() {
        let control = FakeControl::new();
        let probe = StaticProbe::ready_after(3);
        let db = db(control.clone(), probe.clone());
        let node = NodeId::from("n1");

        db.setup(&node, &topology()).await.unwrap();

        let calls = control.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(
            &calls[0],
            ControlCall::Install { url, .. } if url.contains("v3.1.5")
        ));
        match &calls[1] {
            ControlCall::Start { spec, .. } => {
                assert_eq!(spec.binary, PathBuf::from("/opt/etcd/etcd"));
                assert_eq!(spec.pid_file, PathBuf::from("/opt/etcd/etcd.pid"));
                assert!(spec.args.contains(&"--initial-cluster".to_string()));
            }
            other => panic!("expected start, got {other:?}"),
        }
        assert_eq!(probe.probes(), 3);
        assert!(db.handle(&node).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_times_out_when_never_ready() {
        let db = db(FakeControl::new(), StaticProbe::never());
        let err = db
            .setup(&NodeId::from("n1"), &topology())
            .await
            .unwrap_err();
        match err {
            DbError::ReadinessTimeout { node, waited_ms } => {
                assert_eq!(node, NodeId::from("n1"));
                assert!(waited_ms >= 2000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_install_failure_is_fatal_and_not_retried() {
        let control = FakeControl::new();
        control.fail_install();
        let db = db(control.clone(), StaticProbe::ready_after(1));

        let err = db
            .setup(&NodeId::from("n1"), &topology())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Install { .. }));
        assert_eq!(control.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_keeps_handle_for_teardown() {
        let control = FakeControl::new();
        control.fail_start();
        let db = db(control.clone(), StaticProbe::ready_after(1));
        let node = NodeId::from("n1");

        let err = db.setup(&node, &topology()).await.unwrap_err();
        assert!(matches!(err, DbError::Launch { .. }));
        assert!(db.handle(&node).is_some());

        db.teardown(&node).await.unwrap();
        assert!(db.handle(&node).is_none());
    }

    #[tokio::test]
    async fn test_setup_rejects_unknown_node() {
        let db = db(FakeControl::new(), StaticProbe::ready_after(1));
        let err = db
            .setup(&NodeId::from("n9"), &topology())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_teardown_without_setup_succeeds() {
        let control = FakeControl::new();
        let db = db(control.clone(), StaticProbe::never());

        db.teardown(&NodeId::from("n1")).await.unwrap();
        db.teardown(&NodeId::from("n1")).await.unwrap();

        let calls = control.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(&calls[0], ControlCall::Stop { pid_file, .. }
            if pid_file == &PathBuf::from("/opt/etcd/etcd.pid")));
        assert!(matches!(&calls[1], ControlCall::RemoveDir { dir, .. }
            if dir == &PathBuf::from("/opt/etcd")));
    }

    #[test]
    fn test_log_files_are_static() {
        let db = db(FakeControl::new(), StaticProbe::never());
        assert_eq!(
            db.log_files(&NodeId::from("n1")),
            vec![PathBuf::from("/opt/etcd/etcd.log")]
        );
    }
}
