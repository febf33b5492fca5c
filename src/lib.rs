//! # Cellbridge - Editor ⇄ Kernel Bridge
//!
//! Bridge process between an interactive editor front-end and a long-lived
//! computational kernel:
//! - Line-delimited JSON commands on stdin, events on stdout
//! - Execution correlation: kernel messages filtered by parent request id,
//!   classified by kind, translated into host events
//! - Idle-status detection as the sole per-request terminal condition
//! - Guaranteed `execution_complete` per execution, even on faults
//!
//! ## Architecture
//!
//! ```text
//!   stdin ──▶ CommandReader ──▶ SessionController ──▶ ExecutionEngine
//!                                     │                    │
//!                                     ▼                    ▼
//!                               KernelSession ◀──── poll/submit
//!                                     │
//!   stdout ◀── EventSink ◀── translation + ArtifactStore
//! ```
//!
//! One command is fully processed, including its whole poll loop, before the
//! next is read. The kernel session is exclusively owned by the controller
//! and lent to the engine for the duration of one execution.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod artifacts;
pub mod controller;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{BridgeConfig, CellId, Error, RequestId, Result};
