//! Cluster configuration
//!
//! One immutable value carrying everything the lifecycle manager, topology
//! and client adapter need: where the store is installed, which ports it
//! listens on, and how long we are willing to wait for it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Placeholder substituted with the store version in `archive_url`
const VERSION_PLACEHOLDER: &str = "{version}";

/// Errors raised while validating configuration or building a topology
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Peer and client traffic would share a port
    #[error("peer port and client port must differ (both {0})")]
    PortCollision(u16),
    /// A topology needs at least one node
    #[error("node set is empty")]
    EmptyNodeSet,
    /// A timeout or interval was configured as zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    /// Install directory is empty or relative
    #[error("install directory must be an absolute path, got {0:?}")]
    InstallDir(PathBuf),
}

/// Configuration for an etcd test cluster
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// etcd release to install (default: v3.1.5)
    pub version: String,
    /// Download URL; `{version}` is replaced with `version`
    pub archive_url: String,
    /// Directory holding the binary, log and pid file on every node (default: /opt/etcd)
    pub install_dir: PathBuf,
    /// Binary name inside `install_dir` (default: etcd)
    pub binary: String,
    /// Log file name inside `install_dir`
    pub log_file: String,
    /// Pid file name inside `install_dir`
    pub pid_file: String,
    /// Port for replica-to-replica traffic (default: 2380)
    pub peer_port: u16,
    /// Port for client traffic (default: 2379)
    pub client_port: u16,
    /// How long setup waits for a node to accept clients (default: 30s)
    pub readiness_timeout: Duration,
    /// Delay between readiness probes (default: 500ms)
    pub readiness_poll_interval: Duration,
    /// Per-request client timeout (default: 5000ms)
    pub request_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            version: "v3.1.5".to_string(),
            archive_url:
                "https://storage.googleapis.com/etcd/{version}/etcd-{version}-linux-amd64.tar.gz"
                    .to_string(),
            install_dir: PathBuf::from("/opt/etcd"),
            binary: "etcd".to_string(),
            log_file: "etcd.log".to_string(),
            pid_file: "etcd.pid".to_string(),
            peer_port: 2380,
            client_port: 2379,
            readiness_timeout: Duration::from_secs(30),
            readiness_poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

impl ClusterConfig {
    /// Use a different etcd release
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Use a different archive URL template
    pub fn with_archive_url(mut self, url: impl Into<String>) -> Self {
        self.archive_url = url.into();
        self
    }

    /// Install into a different directory
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    /// Use custom peer and client ports
    pub fn with_ports(mut self, peer_port: u16, client_port: u16) -> Self {
        self.peer_port = peer_port;
        self.client_port = client_port;
        self
    }

    /// Use a custom readiness deadline and poll interval
    pub fn with_readiness(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.readiness_timeout = timeout;
        self.readiness_poll_interval = poll_interval;
        self
    }

    /// Use a custom per-request client timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check the invariants every other component relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_port == self.client_port {
            return Err(ConfigError::PortCollision(self.peer_port));
        }
        if !self.install_dir.is_absolute() {
            return Err(ConfigError::InstallDir(self.install_dir.clone()));
        }
        for (name, value) in [
            ("readiness_timeout", self.readiness_timeout),
            ("readiness_poll_interval", self.readiness_poll_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// Archive URL with the version filled in
    pub fn resolved_archive_url(&self) -> String {
        self.archive_url.replace(VERSION_PLACEHOLDER, &self.version)
    }

    /// Full path of the store binary
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(&self.binary)
    }

    /// Full path of the log file
    pub fn log_path(&self) -> PathBuf {
        self.install_dir.join(&self.log_file)
    }

    /// Full path of the pid file
    pub fn pid_path(&self) -> PathBuf {
        self.install_dir.join(&self.pid_file)
    }
}
