//! Operation history
//!
//! Records every invoked operation with its outcome and timing interval so an
//! external checker can analyze the run. Entries are exported as JSON lines.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientError};
use crate::op::{Operation, OutcomeRecord, Status};
use crate::topology::NodeId;

/// Microsecond timestamp relative to history start
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

/// Logical process (worker) identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

/// A completed operation with its timing interval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique operation id
    pub id: u64,
    /// Worker that invoked the operation
    pub process: ProcessId,
    /// Node the worker is connected to
    pub node: NodeId,
    /// What was asked
    pub op: Operation,
    /// How it was classified
    pub outcome: OutcomeRecord,
    /// When the call was issued
    pub invoke_ts: Timestamp,
    /// When the outcome was known
    pub complete_ts: Timestamp,
}

impl HistoryEntry {
    /// Whether the two intervals overlap
    pub fn overlaps(&self, other: &HistoryEntry) -> bool {
        self.invoke_ts <= other.complete_ts && other.invoke_ts <= self.complete_ts
    }
}

/// Collection of completed operations from one run
#[derive(Clone, Debug)]
pub struct History {
    entries: Vec<HistoryEntry>,
    start_time: Instant,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    /// Create an empty history starting now
    pub fn new() -> Self {
        History {
            entries: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Time since the history started
    pub fn now(&self) -> Timestamp {
        Timestamp(self.start_time.elapsed().as_micros() as u64)
    }

    /// Append a completed entry
    pub fn add(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// All entries in completion order
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by invocation time
    pub fn sorted_by_invoke_time(&self) -> Vec<&HistoryEntry> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by_key(|e| (e.invoke_ts, e.id));
        sorted
    }

    /// Entries addressed to one independent register
    pub fn entries_for_key(&self, key: u64) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.op.key == key).collect()
    }

    /// Registers touched during the run
    pub fn keys(&self) -> BTreeSet<u64> {
        self.entries.iter().map(|e| e.op.key).collect()
    }

    /// Entries with the given status
    pub fn with_status(&self, status: Status) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome.status == status)
            .collect()
    }

    /// One JSON object per line, sorted by invocation time
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in self.sorted_by_invoke_time() {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// A process bound to one connection, recording everything it invokes
pub struct Worker<C: Client> {
    process: ProcessId,
    node: NodeId,
    client: Arc<C>,
    conn: C::Connection,
    history: Arc<Mutex<History>>,
    next_op_id: Arc<AtomicU64>,
}

impl<C: Client> Worker<C> {
    /// Open a connection to `node` for `process`
    pub async fn open(
        client: Arc<C>,
        node: NodeId,
        process: ProcessId,
        history: Arc<Mutex<History>>,
        op_counter: Arc<AtomicU64>,
    ) -> Result<Self, ClientError> {
        let conn = client.open(&node).await?;
        Ok(Worker {
            process,
            node,
            client,
            conn,
            history,
            next_op_id: op_counter,
        })
    }

    /// Process id of this worker
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Invoke `op` and record it; no retries
    pub async fn invoke(&self, op: Operation) -> OutcomeRecord {
        let id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        let invoke_ts = self.history.lock().now();

        let outcome = self.client.invoke(&self.conn, &op).await;

        let mut history = self.history.lock();
        let complete_ts = history.now();
        history.add(HistoryEntry {
            id,
            process: self.process,
            node: self.node.clone(),
            op,
            outcome: outcome.clone(),
            invoke_ts,
            complete_ts,
        });
        outcome
    }

    /// Close the underlying connection
    pub async fn close(self) {
        self.client.close(self.conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Fault, MemoryCluster, RegisterClient};
    use crate::op::{ErrorKind, Observed};

    fn entry(id: u64, key: u64, invoke: u64, complete: u64, status: Status) -> HistoryEntry {
        HistoryEntry {
            id,
            process: ProcessId(0),
            node: NodeId::from("n1"),
            op: Operation::read(key),
            outcome: OutcomeRecord {
                status,
                value: None,
                error: None,
            },
            invoke_ts: Timestamp(invoke),
            complete_ts: Timestamp(complete),
        }
    }

    #[test]
    fn test_overlap() {
        let a = entry(1, 1, 100, 300, Status::Ok);
        let b = entry(2, 1, 200, 400, Status::Ok);
        let c = entry(3, 1, 500, 600, Status::Ok);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_queries() {
        let mut history = History::new();
        history.add(entry(2, 1, 300, 400, Status::Info));
        history.add(entry(1, 2, 100, 200, Status::Ok));
        history.add(entry(3, 1, 500, 600, Status::Fail));

        let sorted: Vec<u64> = history.sorted_by_invoke_time().iter().map(|e| e.id).collect();
        assert_eq!(sorted, vec![1, 2, 3]);
        assert_eq!(history.entries_for_key(1).len(), 2);
        assert_eq!(history.keys().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(history.with_status(Status::Info)[0].id, 2);
    }

    #[test]
    fn test_json_lines_export() {
        let mut history = History::new();
        history.add(entry(1, 1, 100, 200, Status::Ok));
        history.add(entry(2, 1, 300, 400, Status::Ok));

        let lines = history.to_json_lines().unwrap();
        let parsed: Vec<HistoryEntry> = lines
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], history.entries()[0]);
    }

    #[tokio::test]
    async fn test_worker_records_each_invoke() {
        let cluster = MemoryCluster::new();
        let client = Arc::new(RegisterClient::new(cluster.clone()));
        let history = Arc::new(Mutex::new(History::new()));
        let counter = Arc::new(AtomicU64::new(1));

        let worker = Worker::open(
            client,
            NodeId::from("n1"),
            ProcessId(7),
            history.clone(),
            counter.clone(),
        )
        .await
        .unwrap();

        worker.invoke(Operation::write(1, 3)).await;
        cluster.inject(Fault::Timeout);
        let outcome = worker.invoke(Operation::write(1, 4)).await;
        assert_eq!(outcome, OutcomeRecord::info(ErrorKind::Timeout));
        cluster.heal();
        let outcome = worker.invoke(Operation::read(1)).await;
        assert_eq!(outcome, OutcomeRecord::read_ok(Observed::Value(3)));
        worker.close().await;

        let history = history.lock();
        assert_eq!(history.len(), 3);
        assert!(history.entries().iter().all(|e| e.process == ProcessId(7)));
        assert!(history.entries()[0].invoke_ts <= history.entries()[0].complete_ts);
        assert_eq!(history.with_status(Status::Info).len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
