//! Shell-based node control
//!
//! Runs small `sh` scripts either on the local machine or on the node over
//! `ssh`. Every script is idempotent where the lifecycle needs it to be.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{DaemonSpec, NodeControl, RemoteError};
use crate::topology::NodeId;

/// SSH connection settings
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote user (default: root)
    pub user: String,
    /// SSH port (default: 22)
    pub port: u16,
    /// Identity file passed with `-i`
    pub private_key: Option<PathBuf>,
    /// Whether to verify host keys
    pub strict_host_key_checking: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            user: "root".to_string(),
            port: 22,
            private_key: None,
            strict_host_key_checking: false,
        }
    }
}

/// Where scripts are executed
#[derive(Debug, Clone)]
pub enum Executor {
    /// Run on this machine with `sh -c`
    Local,
    /// Run on the node over ssh
    Ssh(SshConfig),
}

/// `NodeControl` implemented with shell scripts
#[derive(Debug, Clone)]
pub struct ShellControl {
    executor: Executor,
}

impl ShellControl {
    /// Run scripts on the local machine (all nodes resolve to localhost)
    pub fn local() -> Self {
        ShellControl {
            executor: Executor::Local,
        }
    }

    /// Run scripts on each node over ssh
    pub fn ssh(config: SshConfig) -> Self {
        ShellControl {
            executor: Executor::Ssh(config),
        }
    }

    /// Build the process that runs `script` against `node`
    fn command(&self, node: &NodeId, script: &str) -> Command {
        match &self.executor {
            Executor::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            Executor::Ssh(ssh) => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-o").arg("BatchMode=yes");
                if !ssh.strict_host_key_checking {
                    cmd.arg("-o").arg("StrictHostKeyChecking=no");
                    cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
                }
                cmd.arg("-p").arg(ssh.port.to_string());
                if let Some(key) = &ssh.private_key {
                    cmd.arg("-i").arg(key);
                }
                cmd.arg(format!("{}@{}", ssh.user, node));
                cmd.arg(format!("sh -c {}", quote(script)));
                cmd
            }
        }
    }

    async fn run(&self, node: &NodeId, script: &str) -> Result<(), RemoteError> {
        tracing::debug!(node = %node, script, "running remote script");

        let output = self
            .command(node, script)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RemoteError::Spawn {
                node: node.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RemoteError::Failed {
                node: node.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl NodeControl for ShellControl {
    async fn install_archive(
        &self,
        node: &NodeId,
        url: &str,
        dir: &Path,
    ) -> Result<(), RemoteError> {
        self.run(node, &install_script(url, dir)).await
    }

    async fn start_daemon(&self, node: &NodeId, spec: &DaemonSpec) -> Result<(), RemoteError> {
        self.run(node, &start_script(spec)).await
    }

    async fn stop_daemon(&self, node: &NodeId, pid_file: &Path) -> Result<(), RemoteError> {
        self.run(node, &stop_script(pid_file)).await
    }

    async fn remove_dir(&self, node: &NodeId, dir: &Path) -> Result<(), RemoteError> {
        self.run(node, &format!("rm -rf {}", quote_path(dir))).await
    }
}

/// Download `url` and unpack it into `dir`, dropping the archive's top-level directory
pub fn install_script(url: &str, dir: &Path) -> String {
    let dir = quote_path(dir);
    format!(
        "set -e; mkdir -p {dir}; curl -fsSL {url} | tar -xzf - --strip-components=1 -C {dir}",
        dir = dir,
        url = quote(url),
    )
}

/// Launch `spec.binary` in the background and record its pid
pub fn start_script(spec: &DaemonSpec) -> String {
    let mut command = quote_path(&spec.binary);
    for arg in &spec.args {
        command.push(' ');
        command.push_str(&quote(arg));
    }
    format!(
        "set -e; cd {dir}; nohup {command} >> {log} 2>&1 < /dev/null & echo $! > {pid}",
        dir = quote_path(&spec.working_dir),
        command = command,
        log = quote_path(&spec.log_file),
        pid = quote_path(&spec.pid_file),
    )
}

/// Kill the recorded process if there is one; never fails on a missing process
pub fn stop_script(pid_file: &Path) -> String {
    let pid = quote_path(pid_file);
    format!(
        "if [ -f {pid} ]; then kill -9 \"$(cat {pid})\" 2>/dev/null || true; rm -f {pid}; fi",
        pid = pid
    )
}

/// Single-quote `s` for POSIX sh
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}
