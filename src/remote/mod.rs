//! Node control layer
//!
//! - `ShellControl`: runs scripts locally or over ssh
//! - `testing::FakeControl`: records calls for tests

pub mod shell;
pub mod traits;

pub use shell::{ShellControl, SshConfig};
pub use traits::{DaemonSpec, NodeControl, RemoteError};
