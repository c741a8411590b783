//! etcd register harness binary
//!
//! Sets up etcd on every node, runs a short register smoke check through one
//! connection per node, prints the recorded history as JSON lines, and tears
//! the cluster down again.
//!
//! Usage: etcd-register --node <HOST> [--node <HOST> ...] [options]
//!
//! Example for a 3-node cluster reachable over ssh as root:
//!   etcd-register --node n1 --node n2 --node n3 --version v3.1.5
//!
//! Options:
//!   --version <V>        etcd release to install (default: v3.1.5)
//!   --install-dir <DIR>  install directory on each node (default: /opt/etcd)
//!   --ssh-user <USER>    ssh user (default: root)
//!   --ssh-port <PORT>    ssh port (default: 22)
//!   --ssh-key <PATH>     ssh identity file
//!   --local              run node commands locally instead of over ssh (single node)
//!   --keep               leave the cluster running afterwards
//!
//! Logging is controlled with RUST_LOG (default: info).

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use etcd_register::client::{Client, ClientError, EtcdConnector, RegisterClient};
use etcd_register::db::{setup_all, with_cluster, Db, EtcdDb, HttpHealthProbe};
use etcd_register::history::{History, ProcessId, Worker};
use etcd_register::remote::{ShellControl, SshConfig};
use etcd_register::{ClusterConfig, ClusterTopology, NodeId, Operation};

const USAGE: &str = "usage: etcd-register --node <HOST> [--node <HOST> ...] \
[--version V] [--install-dir DIR] [--ssh-user USER] [--ssh-port PORT] [--ssh-key PATH] [--local] [--keep]";

/// Parsed command line
#[derive(Debug, Default)]
struct CliArgs {
    nodes: Vec<NodeId>,
    version: Option<String>,
    install_dir: Option<PathBuf>,
    ssh: SshConfig,
    local: bool,
    keep: bool,
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{} requires a value\n{}", flag, USAGE))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--node" => cli.nodes.push(NodeId::new(flag_value(&mut args, &flag)?)),
            "--version" => cli.version = Some(flag_value(&mut args, &flag)?),
            "--install-dir" => cli.install_dir = Some(flag_value(&mut args, &flag)?.into()),
            "--ssh-user" => cli.ssh.user = flag_value(&mut args, &flag)?,
            "--ssh-port" => {
                cli.ssh.port = flag_value(&mut args, &flag)?
                    .parse()
                    .context("invalid --ssh-port")?
            }
            "--ssh-key" => cli.ssh.private_key = Some(flag_value(&mut args, &flag)?.into()),
            "--local" => cli.local = true,
            "--keep" => cli.keep = true,
            other => bail!("unknown argument: {}\n{}", other, USAGE),
        }
    }

    if cli.nodes.is_empty() {
        bail!("at least one --node is required\n{}", USAGE);
    }
    if cli.local && cli.nodes.len() > 1 {
        bail!("--local runs a single node; got {} --node flags", cli.nodes.len());
    }
    Ok(cli)
}

/// Write on the first node, quorum-read on the second, CAS on the third
async fn smoke_check<C: Client>(
    client: Arc<C>,
    topology: &ClusterTopology,
    history: Arc<Mutex<History>>,
) -> Result<(), ClientError> {
    let nodes: Vec<NodeId> = topology.nodes().cloned().collect();
    let counter = Arc::new(AtomicU64::new(1));
    let plan = [
        Operation::write(1, 3),
        Operation::read(1),
        Operation::cas(1, 3, 4),
    ];

    for (i, op) in plan.into_iter().enumerate() {
        let node = nodes[i % nodes.len()].clone();
        let worker = Worker::open(
            client.clone(),
            node.clone(),
            ProcessId(i as u64),
            history.clone(),
            counter.clone(),
        )
        .await?;
        let outcome = worker.invoke(op).await;
        tracing::info!(node = %node, ?op, status = ?outcome.status, "smoke check");
        worker.close().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = parse_args(std::env::args().skip(1))?;

    let mut config = ClusterConfig::default();
    if let Some(version) = cli.version {
        config = config.with_version(version);
    }
    if let Some(dir) = cli.install_dir {
        config = config.with_install_dir(dir);
    }
    config.validate()?;

    let topology = ClusterTopology::new(cli.nodes, &config)?;
    tracing::info!(members = %topology.membership_descriptor(), "cluster topology");

    let control = if cli.local {
        ShellControl::local()
    } else {
        ShellControl::ssh(cli.ssh)
    };
    let probe = HttpHealthProbe::new(Duration::from_secs(1))?;
    let db = EtcdDb::new(Arc::new(config.clone()), control, probe);
    let client = Arc::new(RegisterClient::new(EtcdConnector::new(
        &topology,
        config.request_timeout,
    )));
    let history = Arc::new(Mutex::new(History::new()));

    if cli.keep {
        setup_all(&db, &topology).await?;
        smoke_check(client, &topology, history.clone()).await?;
    } else {
        with_cluster(&db, &topology, || {
            smoke_check(client, &topology, history.clone())
        })
        .await??;
    }

    print!("{}", history.lock().to_json_lines()?);
    for node in topology.nodes() {
        for log in db.log_files(node) {
            tracing::info!(node = %node, log = %log.display(), "log file");
        }
    }
    Ok(())
}
