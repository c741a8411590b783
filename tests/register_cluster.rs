//! End-to-end register tests
//!
//! Bring a 3-node cluster up through the lifecycle manager, then drive the
//! register client over real HTTP against an in-process etcd stub whose
//! members share one keyspace.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use etcd_register::client::{Client, EtcdConnector, RegisterClient};
use etcd_register::db::{with_cluster, EtcdDb};
use etcd_register::history::{History, ProcessId, Worker};
use etcd_register::testing::{ControlCall, FakeControl, StaticProbe, StubEtcd};
use etcd_register::{
    ClusterConfig, ClusterTopology, ErrorKind, KeyNamespace, NodeId, Observed, Operation,
    OutcomeRecord, Status,
};

const NODES: [&str; 3] = ["n1", "n2", "n3"];

fn topology() -> ClusterTopology {
    ClusterTopology::new(NODES.into_iter().map(NodeId::from), &ClusterConfig::default()).unwrap()
}

fn lifecycle(control: FakeControl) -> EtcdDb<FakeControl, StaticProbe> {
    EtcdDb::new(
        Arc::new(ClusterConfig::default()),
        control,
        StaticProbe::ready_after(1),
    )
}

#[tokio::test]
async fn test_write_on_one_node_read_on_another() {
    let stub = StubEtcd::start(&NODES).await;
    let control = FakeControl::new();
    let db = lifecycle(control.clone());
    let topology = topology();

    let outcomes = with_cluster(&db, &topology, || async {
        let client = RegisterClient::new(EtcdConnector::from_endpoints(
            stub.endpoints(),
            Duration::from_secs(2),
        ));
        let a = client.open(&NodeId::from("n1")).await.unwrap();
        let b = client.open(&NodeId::from("n2")).await.unwrap();

        let write = client.invoke(&a, &Operation::write(1, 3)).await;
        let read = client.invoke(&b, &Operation::read(1)).await;

        client.close(a).await;
        client.close(b).await;
        (write, read)
    })
    .await
    .unwrap();

    assert_eq!(outcomes.0, OutcomeRecord::ok());
    assert_eq!(outcomes.1, OutcomeRecord::read_ok(Observed::Value(3)));

    // Every node was started with the same founding membership
    let descriptors: Vec<String> = control
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ControlCall::Start { spec, .. } => {
                let pos = spec.args.iter().position(|a| a == "--initial-cluster")?;
                spec.args.get(pos + 1).cloned()
            }
            _ => None,
        })
        .collect();
    assert_eq!(descriptors.len(), 3);
    assert!(descriptors.iter().all(|d| d == &topology.membership_descriptor()));

    // and torn down afterwards
    let removed = control
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ControlCall::RemoveDir { .. }))
        .count();
    assert_eq!(removed, 3);
}

#[tokio::test]
async fn test_cas_sequence_over_http() {
    let stub = StubEtcd::start(&NODES).await;
    let client = RegisterClient::new(EtcdConnector::from_endpoints(
        stub.endpoints(),
        Duration::from_secs(2),
    ));
    let conn = client.open(&NodeId::from("n3")).await.unwrap();

    assert_eq!(
        client.invoke(&conn, &Operation::read(9)).await,
        OutcomeRecord::read_ok(Observed::Absent)
    );
    assert_eq!(
        client.invoke(&conn, &Operation::cas(9, 2, 7)).await,
        OutcomeRecord::fail(Some(ErrorKind::NotFound))
    );
    client.invoke(&conn, &Operation::write(9, 2)).await;
    assert_eq!(
        client.invoke(&conn, &Operation::cas(9, 2, 7)).await,
        OutcomeRecord::ok()
    );
    assert_eq!(
        client.invoke(&conn, &Operation::cas(9, 2, 7)).await,
        OutcomeRecord::fail(None)
    );
    assert_eq!(stub.value("9"), Some("7".to_string()));
}

#[tokio::test]
async fn test_slow_cluster_classification() {
    let stub = StubEtcd::start(&NODES).await;
    stub.set_delay(Duration::from_millis(500));
    let client = RegisterClient::new(EtcdConnector::from_endpoints(
        stub.endpoints(),
        Duration::from_millis(100),
    ));
    let conn = client.open(&NodeId::from("n1")).await.unwrap();

    let read = client.invoke(&conn, &Operation::read(1)).await;
    assert_eq!(read, OutcomeRecord::fail(Some(ErrorKind::Timeout)));

    for op in [Operation::write(1, 1), Operation::cas(1, 1, 2)] {
        let outcome = client.invoke(&conn, &op).await;
        assert_eq!(outcome, OutcomeRecord::info(ErrorKind::Timeout));
    }
}

#[tokio::test]
async fn test_stopped_node_only_affects_its_connections() {
    let mut stub = StubEtcd::start(&NODES).await;
    let client = RegisterClient::new(EtcdConnector::from_endpoints(
        stub.endpoints(),
        Duration::from_millis(500),
    ));
    let down = client.open(&NodeId::from("n2")).await.unwrap();
    let up = client.open(&NodeId::from("n1")).await.unwrap();

    stub.stop_node("n2").await;

    let read = client.invoke(&down, &Operation::read(1)).await;
    assert_eq!(read.status, Status::Fail);
    let write = client.invoke(&down, &Operation::write(1, 5)).await;
    assert_eq!(write.status, Status::Info);

    assert_eq!(
        client.invoke(&up, &Operation::write(1, 6)).await,
        OutcomeRecord::ok()
    );
}

#[tokio::test]
async fn test_independent_registers_do_not_interfere() {
    let stub = StubEtcd::start(&NODES).await;
    let client = Arc::new(RegisterClient::with_namespace(
        EtcdConnector::from_endpoints(stub.endpoints(), Duration::from_secs(2)),
        KeyNamespace::prefixed("jepsen"),
    ));
    let history = Arc::new(Mutex::new(History::new()));
    let counter = Arc::new(AtomicU64::new(1));

    let mut handles = Vec::new();
    for (i, node) in NODES.iter().enumerate() {
        let worker = Worker::open(
            client.clone(),
            NodeId::from(*node),
            ProcessId(i as u64),
            history.clone(),
            counter.clone(),
        )
        .await
        .unwrap();
        let key = i as u64;
        handles.push(tokio::spawn(async move {
            for value in 0..5 {
                worker.invoke(Operation::write(key, value)).await;
                let read = worker.invoke(Operation::read(key)).await;
                assert_eq!(read, OutcomeRecord::read_ok(Observed::Value(value)));
            }
            worker.close().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let history = history.lock();
    assert_eq!(history.len(), 30);
    assert_eq!(history.keys().len(), 3);
    assert!(history.with_status(Status::Ok).len() == 30);
    for key in 0..3u64 {
        assert_eq!(stub.value(&format!("jepsen/{}", key)), Some("4".to_string()));
    }
}

#[tokio::test]
async fn test_reserved_characters_in_prefix_keep_registers_apart() {
    let stub = StubEtcd::start(&NODES).await;
    let register = |prefix: &str| {
        RegisterClient::with_namespace(
            EtcdConnector::from_endpoints(stub.endpoints(), Duration::from_secs(2)),
            KeyNamespace::prefixed(prefix),
        )
    };
    let a = register("reg#a");
    let b = register("reg#b");
    let conn_a = a.open(&NodeId::from("n1")).await.unwrap();
    let conn_b = b.open(&NodeId::from("n2")).await.unwrap();

    assert_eq!(
        a.invoke(&conn_a, &Operation::write(1, 3)).await,
        OutcomeRecord::ok()
    );
    assert_eq!(
        b.invoke(&conn_b, &Operation::read(1)).await,
        OutcomeRecord::read_ok(Observed::Absent)
    );

    assert_eq!(stub.value("reg#a/1"), Some("3".to_string()));
    assert_eq!(stub.value("reg#b/1"), None);
    assert_eq!(stub.value("reg"), None);
}
