//! Register operations and their classified outcomes
//!
//! An [`Operation`] is what the external generator asks for; an
//! [`OutcomeRecord`] is what the checker gets back. The tri-state status is
//! the contract between the two: `Fail` means the operation definitely did not
//! take effect, `Info` means it may or may not have.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Register value type
pub type Value = i64;

/// Kind of register operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "f")]
pub enum OpKind {
    /// Quorum read
    Read,
    /// Unconditional write
    Write { value: Value },
    /// Compare-and-swap from `expected` to `new`
    Cas { expected: Value, new: Value },
}

impl OpKind {
    /// Whether the operation may change the stored value
    pub fn is_mutating(&self) -> bool {
        !matches!(self, OpKind::Read)
    }
}

/// A register operation addressed to one independent key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Logical register key
    pub key: u64,
    /// What to do with it
    #[serde(flatten)]
    pub kind: OpKind,
}

impl Operation {
    /// Read `key`
    pub fn read(key: u64) -> Self {
        Operation { key, kind: OpKind::Read }
    }

    /// Write `value` to `key`
    pub fn write(key: u64, value: Value) -> Self {
        Operation {
            key,
            kind: OpKind::Write { value },
        }
    }

    /// Swap `key` from `expected` to `new`
    pub fn cas(key: u64, expected: Value, new: Value) -> Self {
        Operation {
            key,
            kind: OpKind::Cas { expected, new },
        }
    }
}

/// Completion type of an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Took effect
    Ok,
    /// Definitely did not take effect
    Fail,
    /// Indeterminate: may have taken effect
    Info,
}

/// Value observed by a successful read
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Observed {
    /// The key held no value
    Absent,
    /// The key held this value
    Value(Value),
}

impl From<Option<Value>> for Observed {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(v) => Observed::Value(v),
            None => Observed::Absent,
        }
    }
}

/// Why an operation did not complete with `Ok`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum ErrorKind {
    /// The request timed out
    Timeout,
    /// The store reported that the key does not exist
    NotFound,
    /// Could not reach the node
    Connection(String),
    /// The store answered with an error we do not otherwise classify
    Rejected { code: Option<u64>, message: String },
    /// The store answered with something we could not parse
    Decode(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Connection(msg) => write!(f, "connection: {}", msg),
            ErrorKind::Rejected { code: Some(code), message } => {
                write!(f, "rejected ({}): {}", code, message)
            }
            ErrorKind::Rejected { code: None, message } => write!(f, "rejected: {}", message),
            ErrorKind::Decode(msg) => write!(f, "decode: {}", msg),
        }
    }
}

/// Classified result of invoking one operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Completion type
    pub status: Status,
    /// Observed value, set only for successful reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Observed>,
    /// Failure reason, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl OutcomeRecord {
    /// Successful operation with no result value
    pub fn ok() -> Self {
        OutcomeRecord {
            status: Status::Ok,
            value: None,
            error: None,
        }
    }

    /// Successful read
    pub fn read_ok(value: Observed) -> Self {
        OutcomeRecord {
            status: Status::Ok,
            value: Some(value),
            error: None,
        }
    }

    /// Definite failure, optionally with a reason
    pub fn fail(error: Option<ErrorKind>) -> Self {
        OutcomeRecord {
            status: Status::Fail,
            value: None,
            error,
        }
    }

    /// Indeterminate outcome
    pub fn info(error: ErrorKind) -> Self {
        OutcomeRecord {
            status: Status::Info,
            value: None,
            error: Some(error),
        }
    }

    /// Whether the operation may have taken effect
    pub fn is_indeterminate(&self) -> bool {
        self.status == Status::Info
    }
}
