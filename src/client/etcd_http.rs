//! etcd v2 keys API client
//!
//! Speaks just enough of `/v2/keys` for a register: quorum get, set, and
//! compare-and-swap via `prevValue`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{ClientError, KvStore, StoreConnector, StoreError};
use crate::op::Value;
use crate::topology::{ClusterTopology, NodeId};

/// etcd error code for a missing key
pub const ERROR_KEY_NOT_FOUND: u64 = 100;
/// etcd error code for a failed `prevValue` comparison
pub const ERROR_COMPARE_FAILED: u64 = 101;

/// Node body of a successful keys response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyNode {
    /// Full key path, e.g. "/1"
    pub key: String,
    /// Stored value; absent for directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Successful keys response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysResponse {
    /// "get", "set", "compareAndSwap", ...
    pub action: String,
    /// Affected node
    pub node: KeyNode,
}

/// Error body returned by etcd
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdErrorBody {
    /// Numeric etcd error code
    pub error_code: u64,
    /// Human readable message
    pub message: String,
    /// Key or detail the error refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Builds `EtcdHttpStore`s from a map of node client URLs
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    endpoints: HashMap<NodeId, String>,
    request_timeout: Duration,
}

impl EtcdConnector {
    /// Connector for every node of `topology`
    pub fn new(topology: &ClusterTopology, request_timeout: Duration) -> Self {
        let endpoints = topology
            .nodes()
            .map(|node| (node.clone(), topology.client_address(node)))
            .collect();
        Self::from_endpoints(endpoints, request_timeout)
    }

    /// Connector for explicit node → client URL pairs
    pub fn from_endpoints(endpoints: HashMap<NodeId, String>, request_timeout: Duration) -> Self {
        EtcdConnector {
            endpoints,
            request_timeout,
        }
    }
}

impl StoreConnector for EtcdConnector {
    type Store = EtcdHttpStore;

    fn connect(&self, node: &NodeId) -> Result<EtcdHttpStore, ClientError> {
        let base_url = self
            .endpoints
            .get(node)
            .ok_or_else(|| ClientError::UnknownNode(node.clone()))?;
        EtcdHttpStore::new(base_url, self.request_timeout).map_err(|reason| ClientError::Build {
            node: node.clone(),
            reason,
        })
    }
}

/// Store handle bound to one etcd member
#[derive(Debug, Clone)]
pub struct EtcdHttpStore {
    base_url: Url,
    http: reqwest::Client,
}

impl EtcdHttpStore {
    /// Create a handle for the member at `base_url` (e.g. "http://n1:2379")
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, String> {
        let base_url = Url::parse(base_url).map_err(|e| format!("{}: {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(format!("{}: not a base URL", base_url));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(EtcdHttpStore { base_url, http })
    }

    /// URL of `key` under `/v2/keys`, each `/`-separated segment percent-encoded
    fn key_url(&self, key: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v2", "keys"])
                .extend(key.trim_start_matches('/').split('/'));
        }
        url
    }

    /// Send a request and read the whole body
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String), StoreError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        Ok((status, body))
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Connection(e.to_string())
    }
}

/// Map a non-success response onto a `StoreError`
fn response_error(status: StatusCode, body: &str) -> StoreError {
    match serde_json::from_str::<EtcdErrorBody>(body) {
        Ok(err) if err.error_code == ERROR_KEY_NOT_FOUND => StoreError::NotFound,
        Ok(err) => StoreError::Rejected {
            code: Some(err.error_code),
            message: err.message,
        },
        Err(_) => StoreError::Rejected {
            code: None,
            message: format!("HTTP {}: {}", status, body.trim()),
        },
    }
}

fn parse_value(body: &str) -> Result<Option<Value>, StoreError> {
    let response: KeysResponse =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))?;
    response
        .node
        .value
        .map(|raw| {
            raw.trim()
                .parse::<Value>()
                .map_err(|e| StoreError::Decode(format!("value {:?}: {}", raw, e)))
        })
        .transpose()
}

#[async_trait]
impl KvStore for EtcdHttpStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let request = self.http.get(self.key_url(key)).query(&[("quorum", "true")]);
        let (status, body) = self.send(request).await?;

        if status.is_success() {
            return parse_value(&body);
        }
        match response_error(status, &body) {
            StoreError::NotFound => Ok(None),
            err => Err(err),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let request = self
            .http
            .put(self.key_url(key))
            .form(&[("value", value.to_string())]);
        let (status, body) = self.send(request).await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(response_error(status, &body))
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
    ) -> Result<bool, StoreError> {
        let request = self
            .http
            .put(self.key_url(key))
            .query(&[("prevValue", expected.to_string())])
            .form(&[("value", new.to_string())]);
        let (status, body) = self.send(request).await?;

        if status.is_success() {
            return Ok(true);
        }
        match response_error(status, &body) {
            StoreError::Rejected {
                code: Some(ERROR_COMPARE_FAILED),
                ..
            } => Ok(false),
            err => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::testing::StubEtcd;

    async fn store(stub: &StubEtcd, node: &str, timeout: Duration) -> EtcdHttpStore {
        let connector = EtcdConnector::from_endpoints(stub.endpoints(), timeout);
        connector.connect(&NodeId::from(node)).unwrap()
    }

    #[test]
    fn test_connector_uses_topology_client_addresses() {
        let topology = ClusterTopology::new(
            vec![NodeId::from("n1"), NodeId::from("n2")],
            &ClusterConfig::default(),
        )
        .unwrap();
        let connector = EtcdConnector::new(&topology, Duration::from_secs(5));

        let store = connector.connect(&NodeId::from("n2")).unwrap();
        assert_eq!(store.key_url("7").as_str(), "http://n2:2379/v2/keys/7");
        assert!(matches!(
            connector.connect(&NodeId::from("n9")),
            Err(ClientError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_key_url_escapes_reserved_characters() {
        let store = EtcdHttpStore::new("http://n1:2379/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.key_url("jepsen/7").as_str(),
            "http://n1:2379/v2/keys/jepsen/7"
        );
        assert_eq!(
            store.key_url("reg#a/1").as_str(),
            "http://n1:2379/v2/keys/reg%23a/1"
        );
        assert_eq!(
            store.key_url("a?b c%/1").as_str(),
            "http://n1:2379/v2/keys/a%3Fb%20c%25/1"
        );
        assert!(EtcdHttpStore::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_response_error_mapping() {
        let not_found = r#"{"errorCode":100,"message":"Key not found","cause":"/1","index":4}"#;
        assert_eq!(
            response_error(StatusCode::NOT_FOUND, not_found),
            StoreError::NotFound
        );

        let compare = r#"{"errorCode":101,"message":"Compare failed","cause":"[2 != 5]"}"#;
        assert_eq!(
            response_error(StatusCode::PRECONDITION_FAILED, compare),
            StoreError::Rejected {
                code: Some(ERROR_COMPARE_FAILED),
                message: "Compare failed".to_string()
            }
        );

        assert!(matches!(
            response_error(StatusCode::BAD_GATEWAY, "upstream down"),
            StoreError::Rejected { code: None, .. }
        ));
    }

    #[test]
    fn test_parse_value() {
        let body = r#"{"action":"get","node":{"key":"/1","value":"3","modifiedIndex":5}}"#;
        assert_eq!(parse_value(body), Ok(Some(3)));

        let garbage = r#"{"action":"get","node":{"key":"/1","value":"three"}}"#;
        assert!(matches!(parse_value(garbage), Err(StoreError::Decode(_))));
    }

    #[tokio::test]
    async fn test_get_set_cas_against_stub() {
        let stub = StubEtcd::start(&["n1"]).await;
        let store = store(&stub, "n1", Duration::from_secs(2)).await;

        assert_eq!(store.get("1").await, Ok(None));
        assert_eq!(
            store.compare_and_swap("1", 0, 1).await,
            Err(StoreError::NotFound)
        );

        store.set("1", 2).await.unwrap();
        assert_eq!(store.get("1").await, Ok(Some(2)));

        assert_eq!(store.compare_and_swap("1", 5, 7).await, Ok(false));
        assert_eq!(store.compare_and_swap("1", 2, 7).await, Ok(true));
        assert_eq!(store.get("1").await, Ok(Some(7)));
        assert_eq!(stub.value("1"), Some("7".to_string()));
    }

    #[tokio::test]
    async fn test_slow_member_times_out() {
        let stub = StubEtcd::start(&["n1"]).await;
        stub.set_delay(Duration::from_millis(500));
        let store = store(&stub, "n1", Duration::from_millis(100)).await;

        assert_eq!(store.get("1").await, Err(StoreError::Timeout));
        assert_eq!(store.set("1", 1).await, Err(StoreError::Timeout));
    }

    #[tokio::test]
    async fn test_unreachable_member_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store =
            EtcdHttpStore::new(&format!("http://{}", addr), Duration::from_millis(500)).unwrap();
        assert!(matches!(
            store.get("1").await,
            Err(StoreError::Connection(_))
        ));
    }
}
