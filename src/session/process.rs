//! Child-process backed kernel session.
//!
//! Spawns a kernel adapter command with piped stdio. Submissions are written
//! as JSON lines to the child's stdin; the child's stdout lines are parsed
//! into [`KernelMessage`] envelopes. The child's stderr is inherited so its
//! diagnostics land on the bridge's own log channel.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::session::{KernelLauncher, KernelMessage, KernelSession};
use crate::types::{Error, KernelConfig, RequestId, Result};

/// Launches [`ProcessSession`]s from a configured adapter command.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: KernelConfig,
}

impl ProcessLauncher {
    pub fn new(config: KernelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl KernelLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Box<dyn KernelSession>> {
        let session = ProcessSession::spawn(&self.config)?;
        Ok(Box::new(session))
    }

    async fn list_kernels(&self) -> Result<Value> {
        // Enumeration is delegated to whatever the launcher knows about;
        // this launcher knows exactly one configured adapter.
        Ok(serde_json::json!({
            "kernels": [{
                "name": self.config.command,
                "argv": self.config.args,
            }]
        }))
    }
}

/// A kernel session talking line-delimited JSON to a child process.
#[derive(Debug)]
pub struct ProcessSession {
    session_id: String,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    shutdown_grace: Duration,
}

impl ProcessSession {
    /// Spawn the adapter process. Failure here is a bootstrap error, the
    /// only fatal condition in the bridge.
    pub fn spawn(config: &KernelConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::bootstrap(format!("failed to spawn kernel '{}': {}", config.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::bootstrap("kernel stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::bootstrap("kernel stdout not piped"))?;

        let session_id = match child.id() {
            Some(pid) => format!("kernel-{}-{}", pid, uuid::Uuid::new_v4()),
            None => format!("kernel-{}", uuid::Uuid::new_v4()),
        };
        tracing::info!("kernel adapter spawned (session {})", session_id);

        Ok(Self {
            session_id,
            child,
            stdin: Some(stdin),
            lines: Some(BufReader::new(stdout).lines()),
            shutdown_grace: config.shutdown_grace,
        })
    }
}

#[async_trait]
impl KernelSession for ProcessSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn submit(&mut self, code: &str) -> Result<RequestId> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::session("kernel channels already stopped"))?;

        let request_id = RequestId::new();
        let mut line = serde_json::to_vec(&serde_json::json!({
            "request_id": request_id,
            "code": code,
        }))?;
        line.push(b'\n');
        stdin
            .write_all(&line)
            .await
            .map_err(|e| Error::session(format!("kernel submit failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::session(format!("kernel submit flush failed: {}", e)))?;
        Ok(request_id)
    }

    async fn poll_next(&mut self, timeout: Duration) -> Result<Option<KernelMessage>> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| Error::session("kernel channels already stopped"))?;

        let next = match tokio::time::timeout(timeout, lines.next_line()).await {
            Err(_elapsed) => return Ok(None),
            Ok(result) => {
                result.map_err(|e| Error::session(format!("kernel read failed: {}", e)))?
            }
        };

        let line = match next {
            Some(line) => line,
            None => return Err(Error::session("kernel output channel closed")),
        };

        match serde_json::from_str::<KernelMessage>(&line) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                // A garbled line from the adapter is skipped, not a fault;
                // the caller re-arms exactly as it would after a timeout.
                tracing::warn!("skipping malformed kernel message: {}", e);
                Ok(None)
            }
        }
    }

    async fn stop_channels(&mut self) -> Result<()> {
        self.lines = None;
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| Error::session(format!("closing kernel stdin failed: {}", e)))?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        // Closing stdin is the exit signal for a well-behaved adapter; give
        // it the grace period, then kill.
        match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(status) => {
                let status =
                    status.map_err(|e| Error::session(format!("kernel wait failed: {}", e)))?;
                tracing::info!("kernel adapter exited with {}", status);
            }
            Err(_elapsed) => {
                tracing::warn!(
                    "kernel adapter did not exit within {:?}, killing",
                    self.shutdown_grace
                );
                self.child
                    .kill()
                    .await
                    .map_err(|e| Error::session(format!("kernel kill failed: {}", e)))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_config() -> KernelConfig {
        KernelConfig {
            command: "cat".to_string(),
            args: vec![],
            poll_timeout: Duration::from_millis(50),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    // `cat` echoes submissions back, so the submission line itself comes
    // back as a (malformed) kernel message and must be skipped.
    #[tokio::test]
    async fn submit_writes_one_line_with_request_id() {
        let mut session = ProcessSession::spawn(&cat_config()).unwrap();
        let request_id = session.submit("1+1").await.unwrap();

        // cat echoes the submission; it parses as JSON but not as a
        // KernelMessage (no "kind"), so poll_next skips it.
        let polled = session.poll_next(Duration::from_secs(1)).await.unwrap();
        assert!(polled.is_none());
        assert!(!request_id.as_str().is_empty());

        session.stop_channels().await.unwrap();
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn poll_times_out_without_output() {
        let mut session = ProcessSession::spawn(&cat_config()).unwrap();
        let polled = session.poll_next(Duration::from_millis(20)).await.unwrap();
        assert!(polled.is_none());

        session.stop_channels().await.unwrap();
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_is_bootstrap_error() {
        let config = KernelConfig {
            command: "definitely-not-a-real-kernel-command".to_string(),
            ..cat_config()
        };
        let err = ProcessSession::spawn(&config).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn closed_stdout_is_a_session_fault() {
        let config = KernelConfig {
            command: "true".to_string(),
            args: vec![],
            ..cat_config()
        };
        let mut session = ProcessSession::spawn(&config).unwrap();
        // `true` exits immediately; once its stdout drains, polling faults.
        loop {
            match session.poll_next(Duration::from_millis(100)).await {
                Ok(_) => continue,
                Err(e) => {
                    assert!(matches!(e, Error::Session(_)));
                    break;
                }
            }
        }
        session.stop_channels().await.unwrap();
        session.shutdown().await.unwrap();
    }
}
