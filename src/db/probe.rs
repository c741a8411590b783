//! Readiness probes
//!
//! Setup polls a probe until the daemon answers or the deadline passes.

use std::time::Duration;

use async_trait::async_trait;

/// Tells whether a node is accepting client connections
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One probe against the node's client URL; never blocks past its own timeout
    async fn is_ready(&self, client_url: &str) -> bool;
}

/// Probes etcd's `/health` endpoint
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl HttpHealthProbe {
    /// Create a probe whose individual requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(HttpHealthProbe { http })
    }
}

#[async_trait]
impl ReadinessProbe for HttpHealthProbe {
    async fn is_ready(&self, client_url: &str) -> bool {
        let url = format!("{}/health", client_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "health probe failed");
                false
            }
        }
    }
}
