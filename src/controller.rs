//! Session lifecycle controller.
//!
//! Top-level state machine: bootstrap a kernel session, announce readiness,
//! dispatch host commands one at a time, then tear the session down. One
//! command is fully processed (including its whole poll loop) before the
//! next is read; the protocol is strictly request-then-response per cell.
//!
//! Known limitation, preserved deliberately: shutdown does not drain an
//! in-flight request. A `shutdown` command ends the dispatch loop without
//! waiting for the current execution to reach idle, so trailing output of
//! that execution is dropped.

use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::engine::ExecutionEngine;
use crate::protocol::command::{Command, CommandReader, ReadOutcome};
use crate::protocol::event::{EventSink, EventType, OutgoingEvent};
use crate::session::KernelLauncher;
use crate::types::{BridgeConfig, Result};
use tokio::io::AsyncBufRead;

/// Owns the kernel session for the life of the bridge process.
#[derive(Debug)]
pub struct SessionController<L> {
    launcher: L,
    config: BridgeConfig,
    cancel: CancellationToken,
}

impl<L: KernelLauncher> SessionController<L> {
    pub fn new(launcher: L, config: BridgeConfig, cancel: CancellationToken) -> Self {
        Self {
            launcher,
            config,
            cancel,
        }
    }

    /// Bootstrap, dispatch until shutdown, release the session.
    ///
    /// Returns `Err` only for the fatal paths: bootstrap failure or a broken
    /// event sink. Everything else is reported as an `error` event and the
    /// loop keeps going.
    pub async fn run<R: AsyncBufRead + Unpin>(
        &self,
        reader: &mut CommandReader<R>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let mut session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("kernel bootstrap failed: {}", e);
                sink.emit(OutgoingEvent::new(
                    EventType::Error,
                    serde_json::json!({"evalue": format!("kernel bootstrap failed: {}", e)}),
                ))
                .await?;
                return Err(e);
            }
        };

        sink.emit(OutgoingEvent::new(
            EventType::Ready,
            serde_json::json!({"session_id": session.session_id()}),
        ))
        .await?;
        tracing::info!("session {} ready", session.session_id());

        let engine = ExecutionEngine::new(
            ArtifactStore::new(&self.config.artifacts),
            self.config.kernel.poll_timeout,
            self.cancel.clone(),
        );

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("external cancellation, leaving dispatch loop");
                break;
            }
            match reader.read_next(sink).await? {
                ReadOutcome::EndOfInput => break,
                ReadOutcome::Command(Command::Shutdown) => break,
                ReadOutcome::Command(Command::Execute { code, cell_id }) => {
                    // An engine error here means the sink failed mid-request;
                    // report once, best effort, and bail.
                    if let Err(e) = engine
                        .run(session.as_mut(), sink, &code, cell_id.clone())
                        .await
                    {
                        tracing::error!("execution dispatch failed: {}", e);
                        sink.emit(
                            OutgoingEvent::new(
                                EventType::Error,
                                serde_json::json!({"evalue": e.to_string()}),
                            )
                            .with_cell(cell_id),
                        )
                        .await?;
                    }
                }
                ReadOutcome::Command(Command::ListKernels) => {
                    match self.launcher.list_kernels().await {
                        Ok(specs) => {
                            sink.emit(OutgoingEvent::new(EventType::KernelSpecs, specs))
                                .await?;
                        }
                        Err(e) => {
                            sink.emit(OutgoingEvent::new(
                                EventType::Error,
                                serde_json::json!({"evalue": e.to_string()}),
                            ))
                            .await?;
                        }
                    }
                }
                ReadOutcome::Command(Command::Unknown) => {
                    // Forward compatibility: newer hosts may send commands
                    // this version doesn't understand.
                    tracing::debug!("ignoring unknown command");
                }
            }
        }

        // Both release steps always run, in order; a failed channel stop
        // must not leave the kernel process behind.
        if let Err(e) = session.stop_channels().await {
            tracing::warn!("stopping kernel channels failed: {}", e);
        }
        if let Err(e) = session.shutdown().await {
            tracing::warn!("kernel shutdown failed: {}", e);
        }
        tracing::info!("session stopped");
        Ok(())
    }
}
