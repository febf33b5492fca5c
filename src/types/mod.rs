//! Core types for the bridge.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (CellId, RequestId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the kernel session and artifacts

mod config;
mod errors;
mod ids;

pub use config::{ArtifactConfig, BridgeConfig, KernelConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{CellId, RequestId};
