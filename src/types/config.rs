//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and/or CLI overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Kernel session configuration.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Artifact store configuration.
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

/// Kernel session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Command used to launch the kernel adapter process.
    pub command: String,

    /// Arguments passed to the kernel adapter.
    pub args: Vec<String>,

    /// Per-iteration poll timeout. A timeout is not an error; the loop
    /// re-arms so the process stays responsive to external shutdown.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Grace period between asking the kernel process to exit and killing it.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "ipykernel_launcher".to_string()],
            poll_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Artifact store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArtifactConfig {
    /// Directory for decoded image files. Defaults to the system temp dir.
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BridgeConfig::default();
        assert_eq!(config.kernel.poll_timeout, Duration::from_secs(1));
        assert!(config.artifacts.dir.is_none());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"kernel": {"command": "julia", "args": [], "poll_timeout": "500ms", "shutdown_grace": "2s"}}"#)
                .unwrap();
        assert_eq!(config.kernel.command, "julia");
        assert_eq!(config.kernel.poll_timeout, Duration::from_millis(500));
        assert_eq!(config.observability.log_level, "info");
    }
}
