//! Kernel session seam.
//!
//! The bridge does not own the kernel wire protocol. It talks to the kernel
//! through `KernelSession`, which the launcher provides, and sees only
//! `KernelMessage` envelopes: a parent request id for correlation, a closed
//! message kind, and a kind-dependent payload. Exhaustive matching on
//! `MessageKind` means the compiler flags any kind added to the protocol
//! that the engine doesn't handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::types::{RequestId, Result};

mod process;

pub use process::{ProcessLauncher, ProcessSession};

/// Kind of an asynchronous kernel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Status,
    Stream,
    DisplayData,
    UpdateDisplayData,
    ExecuteResult,
    ClearOutput,
    Error,
}

/// Envelope for one asynchronous message from the kernel.
///
/// Read-only from the engine's perspective. Messages whose
/// `parent_request_id` does not match the open request are discarded
/// unexamined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelMessage {
    #[serde(default)]
    pub parent_request_id: Option<RequestId>,
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
}

/// One live kernel session.
///
/// Exclusively owned by the lifecycle controller and lent to the correlation
/// engine for the duration of one execution; nothing else may submit or poll
/// on it concurrently.
#[async_trait]
pub trait KernelSession: Send {
    /// Connection identifier, reported in the `ready` event.
    fn session_id(&self) -> &str;

    /// Submit code for execution, returning the request id that the
    /// kernel's asynchronous messages will carry as their parent.
    async fn submit(&mut self, code: &str) -> Result<RequestId>;

    /// Wait up to `timeout` for the next kernel message.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to deliver — not an
    /// error, the caller simply re-arms. `Err` is a transport fault.
    async fn poll_next(&mut self, timeout: Duration) -> Result<Option<KernelMessage>>;

    /// Stop the message channels. Called before `shutdown`.
    async fn stop_channels(&mut self) -> Result<()>;

    /// Stop the kernel process itself.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Launches kernel sessions and enumerates available kernels.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn KernelSession>>;

    /// Enumerate available kernel specs.
    async fn list_kernels(&self) -> Result<Value>;
}
