//! Testing utilities
//!
//! - `StubEtcd`: in-process etcd v2 keys API, one listener per node, one
//!   shared keyspace (every read behaves like a quorum read)
//! - `FakeControl`: records node control calls and fails on request
//! - `StaticProbe`: readiness probe that turns ready after N probes

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    routing::get,
    Form, Json, Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::client::etcd_http::{
    EtcdErrorBody, KeyNode, KeysResponse, ERROR_COMPARE_FAILED, ERROR_KEY_NOT_FOUND,
};
use crate::db::ReadinessProbe;
use crate::remote::{DaemonSpec, NodeControl, RemoteError};
use crate::topology::NodeId;

/// etcd error code for a request missing its `value` field
const ERROR_VALUE_REQUIRED: u64 = 201;

#[derive(Default)]
struct StubState {
    data: Mutex<HashMap<String, String>>,
    delay: Mutex<Duration>,
}

type SharedStub = Arc<StubState>;

type StubReply = (StatusCode, Json<serde_json::Value>);

struct StubNode {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// In-process stand-in for an etcd cluster
pub struct StubEtcd {
    nodes: HashMap<NodeId, StubNode>,
    state: SharedStub,
}

impl StubEtcd {
    /// Start one HTTP listener per node name on 127.0.0.1
    pub async fn start(names: &[&str]) -> Self {
        let state: SharedStub = Arc::new(StubState::default());
        let mut nodes = HashMap::new();

        for name in names {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = stub_router(state.clone());
            let (shutdown_tx, shutdown_rx) = oneshot::channel();

            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });

            nodes.insert(
                NodeId::from(*name),
                StubNode {
                    addr,
                    shutdown_tx: Some(shutdown_tx),
                },
            );
        }

        StubEtcd { nodes, state }
    }

    /// Client URL of one node
    pub fn endpoint(&self, name: &str) -> Option<String> {
        self.nodes
            .get(&NodeId::from(name))
            .map(|node| format!("http://{}", node.addr))
    }

    /// Client URLs of every node
    pub fn endpoints(&self) -> HashMap<NodeId, String> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), format!("http://{}", node.addr)))
            .collect()
    }

    /// Raw stored value of a key
    pub fn value(&self, key: &str) -> Option<String> {
        self.state.data.lock().get(key).cloned()
    }

    /// Delay every response by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Stop serving one node
    pub async fn stop_node(&mut self, name: &str) {
        if let Some(tx) = self
            .nodes
            .get_mut(&NodeId::from(name))
            .and_then(|node| node.shutdown_tx.take())
        {
            let _ = tx.send(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

impl Drop for StubEtcd {
    fn drop(&mut self) {
        for node in self.nodes.values_mut() {
            if let Some(tx) = node.shutdown_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn stub_router(state: SharedStub) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/v2/keys/*key", get(handle_get).put(handle_put))
        .with_state(state)
}

async fn stub_delay(state: &SharedStub) {
    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn key_reply(status: StatusCode, action: &str, key: &str, value: Option<String>) -> StubReply {
    let body = KeysResponse {
        action: action.to_string(),
        node: KeyNode {
            key: format!("/{}", key),
            value,
        },
    };
    (status, Json(serde_json::to_value(body).unwrap()))
}

fn error_reply(status: StatusCode, code: u64, message: &str, key: &str) -> StubReply {
    let body = EtcdErrorBody {
        error_code: code,
        message: message.to_string(),
        cause: Some(format!("/{}", key)),
    };
    (status, Json(serde_json::to_value(body).unwrap()))
}

async fn handle_health(State(state): State<SharedStub>) -> Json<serde_json::Value> {
    stub_delay(&state).await;
    Json(serde_json::json!({ "health": "true" }))
}

async fn handle_get(
    State(state): State<SharedStub>,
    UrlPath(key): UrlPath<String>,
) -> StubReply {
    stub_delay(&state).await;
    let key = key.trim_start_matches('/').to_string();
    let value = state.data.lock().get(&key).cloned();
    match value {
        Some(value) => key_reply(StatusCode::OK, "get", &key, Some(value)),
        None => error_reply(StatusCode::NOT_FOUND, ERROR_KEY_NOT_FOUND, "Key not found", &key),
    }
}

async fn handle_put(
    State(state): State<SharedStub>,
    UrlPath(key): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> StubReply {
    stub_delay(&state).await;
    let key = key.trim_start_matches('/').to_string();
    let Some(value) = form.get("value").cloned() else {
        return error_reply(
            StatusCode::BAD_REQUEST,
            ERROR_VALUE_REQUIRED,
            "Value is Required in POST form",
            &key,
        );
    };

    let mut data = state.data.lock();
    match query.get("prevValue") {
        None => {
            let status = if data.contains_key(&key) {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            data.insert(key.clone(), value.clone());
            key_reply(status, "set", &key, Some(value))
        }
        Some(expected) => match data.get(&key) {
            None => error_reply(StatusCode::NOT_FOUND, ERROR_KEY_NOT_FOUND, "Key not found", &key),
            Some(current) if current != expected => error_reply(
                StatusCode::PRECONDITION_FAILED,
                ERROR_COMPARE_FAILED,
                "Compare failed",
                &key,
            ),
            Some(_) => {
                data.insert(key.clone(), value.clone());
                key_reply(StatusCode::OK, "compareAndSwap", &key, Some(value))
            }
        },
    }
}

/// A call received by `FakeControl`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Install { node: NodeId, url: String, dir: PathBuf },
    Start { node: NodeId, spec: DaemonSpec },
    Stop { node: NodeId, pid_file: PathBuf },
    RemoveDir { node: NodeId, dir: PathBuf },
}

#[derive(Default)]
struct FakeControlState {
    calls: Vec<ControlCall>,
    fail_install: HashSet<Option<NodeId>>,
    fail_start: HashSet<Option<NodeId>>,
}

/// Records node control calls instead of running them
#[derive(Clone, Default)]
pub struct FakeControl {
    state: Arc<Mutex<FakeControlState>>,
}

impl FakeControl {
    /// Control that succeeds at everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<ControlCall> {
        self.state.lock().calls.clone()
    }

    /// Fail installs on every node
    pub fn fail_install(&self) {
        self.state.lock().fail_install.insert(None);
    }

    /// Fail installs on `node`
    pub fn fail_install_on(&self, node: NodeId) {
        self.state.lock().fail_install.insert(Some(node));
    }

    /// Fail daemon launches on every node
    pub fn fail_start(&self) {
        self.state.lock().fail_start.insert(None);
    }

    /// Fail daemon launches on `node`
    pub fn fail_start_on(&self, node: NodeId) {
        self.state.lock().fail_start.insert(Some(node));
    }

    fn record(&self, call: ControlCall) {
        self.state.lock().calls.push(call);
    }

    fn should_fail(set: &HashSet<Option<NodeId>>, node: &NodeId) -> bool {
        set.contains(&None) || set.contains(&Some(node.clone()))
    }

    fn injected(node: &NodeId, what: &str) -> RemoteError {
        RemoteError::Failed {
            node: node.clone(),
            status: "exit status: 1".to_string(),
            stderr: format!("injected {} failure", what),
        }
    }
}

#[async_trait]
impl NodeControl for FakeControl {
    async fn install_archive(
        &self,
        node: &NodeId,
        url: &str,
        dir: &Path,
    ) -> Result<(), RemoteError> {
        self.record(ControlCall::Install {
            node: node.clone(),
            url: url.to_string(),
            dir: dir.to_path_buf(),
        });
        if Self::should_fail(&self.state.lock().fail_install, node) {
            return Err(Self::injected(node, "install"));
        }
        Ok(())
    }

    async fn start_daemon(&self, node: &NodeId, spec: &DaemonSpec) -> Result<(), RemoteError> {
        self.record(ControlCall::Start {
            node: node.clone(),
            spec: spec.clone(),
        });
        if Self::should_fail(&self.state.lock().fail_start, node) {
            return Err(Self::injected(node, "start"));
        }
        Ok(())
    }

    async fn stop_daemon(&self, node: &NodeId, pid_file: &Path) -> Result<(), RemoteError> {
        self.record(ControlCall::Stop {
            node: node.clone(),
            pid_file: pid_file.to_path_buf(),
        });
        Ok(())
    }

    async fn remove_dir(&self, node: &NodeId, dir: &Path) -> Result<(), RemoteError> {
        self.record(ControlCall::RemoveDir {
            node: node.clone(),
            dir: dir.to_path_buf(),
        });
        Ok(())
    }
}

/// Probe that reports ready from the N-th call on (or never)
#[derive(Clone)]
pub struct StaticProbe {
    ready_from: Option<usize>,
    probes: Arc<AtomicUsize>,
}

impl StaticProbe {
    /// Ready once `n` probes have been made (n >= 1)
    pub fn ready_after(n: usize) -> Self {
        StaticProbe {
            ready_from: Some(n.max(1)),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Never ready
    pub fn never() -> Self {
        StaticProbe {
            ready_from: None,
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of probes made so far
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for StaticProbe {
    async fn is_ready(&self, _client_url: &str) -> bool {
        let count = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready_from.is_some_and(|n| count >= n)
    }
}
