//! Execution correlation engine.
//!
//! Maps the kernel's asynchronous, multiplexed message conversation for one
//! submitted execution onto the host's request/stream/complete contract:
//! submit, ack, then poll until the kernel reports idle for this request,
//! translating every matching message into outgoing events along the way.
//!
//! Correlation rules:
//! - Messages whose parent id differs from the open request are discarded
//!   unexamined; stale kernel activity must never leak into another cell.
//! - The idle status message is the sole terminal condition of the loop. A
//!   kernel-reported error is forwarded but does not end the loop.
//! - Exactly one `execution_complete` is emitted per execution, even when
//!   submission or polling faults. The host's per-cell state machine must
//!   never be left waiting.

use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::protocol::event::{EventSink, EventType, OutgoingEvent};
use crate::session::{KernelSession, MessageKind};
use crate::types::{CellId, RequestId, Result};

pub mod translation;

use translation::DisplayContent;

/// One open execution request. At most one exists at a time.
#[derive(Debug)]
struct Request {
    request_id: RequestId,
    cell_id: Option<CellId>,
    execution_count: Option<i64>,
    aggregated_output: Vec<String>,
}

impl Request {
    fn new(request_id: RequestId, cell_id: Option<CellId>) -> Self {
        Self {
            request_id,
            cell_id,
            execution_count: None,
            aggregated_output: Vec::new(),
        }
    }

    /// Build an event correlated to this request. Carries the last known
    /// `execution_count`, which can only grow more precise over time.
    fn event(&self, event_type: EventType, content: Value) -> OutgoingEvent {
        OutgoingEvent::new(event_type, content)
            .with_cell(self.cell_id.clone())
            .with_request(self.request_id.clone())
            .with_execution_count(self.execution_count)
    }
}

/// Drives one execution through the kernel session.
#[derive(Debug)]
pub struct ExecutionEngine {
    store: ArtifactStore,
    poll_timeout: Duration,
    cancel: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(store: ArtifactStore, poll_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            poll_timeout,
            cancel,
        }
    }

    /// Run one execution to its terminal event.
    ///
    /// Returns `Err` only when the sink itself fails; kernel-side problems
    /// are reported as events and still reach `execution_complete`.
    pub async fn run(
        &self,
        session: &mut dyn KernelSession,
        sink: &mut dyn EventSink,
        code: &str,
        cell_id: Option<CellId>,
    ) -> Result<()> {
        // Trivial input short-circuits without a kernel round-trip.
        if code.trim().is_empty() {
            sink.emit(
                OutgoingEvent::new(
                    EventType::ExecuteResult,
                    serde_json::json!({"text/plain": ""}),
                )
                .with_cell(cell_id.clone()),
            )
            .await?;
            sink.emit(
                OutgoingEvent::new(
                    EventType::ExecutionComplete,
                    serde_json::json!({"execution_time": 0}),
                )
                .with_cell(cell_id),
            )
            .await?;
            return Ok(());
        }

        let start = Instant::now();
        let request_id = match session.submit(code).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("submission failed: {}", e);
                sink.emit(
                    OutgoingEvent::new(
                        EventType::Error,
                        serde_json::json!({"evalue": e.to_string()}),
                    )
                    .with_cell(cell_id.clone()),
                )
                .await?;
                sink.emit(
                    OutgoingEvent::new(
                        EventType::ExecutionComplete,
                        serde_json::json!({"execution_time": elapsed_ms(start)}),
                    )
                    .with_cell(cell_id),
                )
                .await?;
                return Ok(());
            }
        };

        let mut request = Request::new(request_id, cell_id);

        // Advisory ack so the host can show a busy indicator before any
        // kernel output arrives.
        sink.emit(request.event(EventType::ExecAck, serde_json::json!({"ok": true})))
            .await?;

        self.poll_until_idle(session, sink, &mut request).await?;

        tracing::debug!(
            request_id = %request.request_id,
            fragments = request.aggregated_output.len(),
            elapsed_ms = elapsed_ms(start),
            "execution finished"
        );
        sink.emit(request.event(
            EventType::ExecutionComplete,
            serde_json::json!({"execution_time": elapsed_ms(start)}),
        ))
        .await?;
        Ok(())
    }

    /// The poll loop. Exits on the idle status for this request, on a
    /// transport fault (reported first), or on external cancellation.
    async fn poll_until_idle(
        &self,
        session: &mut dyn KernelSession,
        sink: &mut dyn EventSink,
        request: &mut Request,
    ) -> Result<()> {
        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::warn!(request_id = %request.request_id, "execution cancelled externally");
                    return Ok(());
                }
                polled = session.poll_next(self.poll_timeout) => polled,
            };

            let msg = match polled {
                // Timeout: not an error, not progress. Re-arm.
                Ok(None) => continue,
                Ok(Some(msg)) => msg,
                Err(e) => {
                    tracing::error!(request_id = %request.request_id, "poll fault: {}", e);
                    sink.emit(request.event(
                        EventType::Error,
                        serde_json::json!({"evalue": e.to_string()}),
                    ))
                    .await?;
                    return Ok(());
                }
            };

            // Correlation filter: anything not parented by this request is
            // stale or concurrent kernel activity.
            if msg.parent_request_id.as_ref() != Some(&request.request_id) {
                continue;
            }

            if let Some(count) = translation::execution_count_of(&msg.payload) {
                request.execution_count = Some(count);
            }

            match msg.kind {
                MessageKind::Status => {
                    if translation::is_idle(&msg.payload) {
                        return Ok(());
                    }
                }
                MessageKind::Stream => {
                    if let Some(text) = msg.payload.get("text").and_then(Value::as_str) {
                        request.aggregated_output.push(text.to_string());
                    }
                    sink.emit(request.event(
                        EventType::Stream,
                        translation::stream_content(&msg.payload),
                    ))
                    .await?;
                }
                MessageKind::DisplayData | MessageKind::UpdateDisplayData => {
                    self.emit_mime(sink, request, &msg.payload, EventType::DisplayData)
                        .await?;
                }
                MessageKind::ExecuteResult => {
                    self.emit_mime(sink, request, &msg.payload, EventType::ExecuteResult)
                        .await?;
                }
                MessageKind::ClearOutput => {
                    sink.emit(request.event(
                        EventType::ClearOutput,
                        translation::clear_content(&msg.payload),
                    ))
                    .await?;
                }
                MessageKind::Error => {
                    // Forwarded, but not terminal: only the idle status ends
                    // the loop.
                    sink.emit(request.event(
                        EventType::Error,
                        translation::error_content(&msg.payload),
                    ))
                    .await?;
                }
            }
        }
    }

    async fn emit_mime(
        &self,
        sink: &mut dyn EventSink,
        request: &Request,
        payload: &Value,
        event_type: EventType,
    ) -> Result<()> {
        let data = payload.get("data").cloned().unwrap_or(Value::Null);
        let content = match translation::classify_mime_bundle(&data) {
            DisplayContent::Image { base64 } => {
                let path = self.store.store_image(&base64);
                serde_json::json!({
                    "type": "image/png",
                    "path": path.display().to_string(),
                })
            }
            DisplayContent::Text(text) => serde_json::json!({"text/plain": text}),
            DisplayContent::Rich { tag, data } => serde_json::json!({
                "type": tag,
                "data": data,
            }),
        };
        sink.emit(request.event(event_type, content)).await
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::event::testing::CaptureSink;
    use crate::session::KernelMessage;
    use crate::types::{ArtifactConfig, Error};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;

    const REQ: &str = "req-1";

    /// Scripted session: returns canned poll results in order. Scripts must
    /// end in an idle status or a fault, otherwise the loop would spin.
    struct ScriptedSession {
        script: VecDeque<Result<Option<KernelMessage>>>,
        submitted: Vec<String>,
        fail_submit: bool,
    }

    impl ScriptedSession {
        fn new(script: Vec<Result<Option<KernelMessage>>>) -> Self {
            Self {
                script: script.into(),
                submitted: Vec::new(),
                fail_submit: false,
            }
        }
    }

    #[async_trait]
    impl KernelSession for ScriptedSession {
        fn session_id(&self) -> &str {
            "scripted"
        }

        async fn submit(&mut self, code: &str) -> Result<RequestId> {
            if self.fail_submit {
                return Err(Error::session("submit refused"));
            }
            self.submitted.push(code.to_string());
            Ok(RequestId::from_string(REQ.into()))
        }

        async fn poll_next(&mut self, _timeout: Duration) -> Result<Option<KernelMessage>> {
            self.script
                .pop_front()
                .unwrap_or(Err(Error::session("script exhausted")))
        }

        async fn stop_channels(&mut self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn msg(kind: MessageKind, payload: Value) -> Result<Option<KernelMessage>> {
        Ok(Some(KernelMessage {
            parent_request_id: Some(RequestId::from_string(REQ.into())),
            kind,
            payload,
        }))
    }

    fn foreign(kind: MessageKind, payload: Value) -> Result<Option<KernelMessage>> {
        Ok(Some(KernelMessage {
            parent_request_id: Some(RequestId::from_string("someone-else".into())),
            kind,
            payload,
        }))
    }

    fn idle() -> Result<Option<KernelMessage>> {
        msg(MessageKind::Status, json!({"execution_state": "idle"}))
    }

    fn engine() -> ExecutionEngine {
        let dir = std::env::temp_dir();
        ExecutionEngine::new(
            ArtifactStore::new(&ArtifactConfig { dir: Some(dir) }),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
    }

    fn cell() -> Option<CellId> {
        Some(CellId::from_string("a".into()))
    }

    fn types_of(sink: &CaptureSink) -> Vec<EventType> {
        sink.events.iter().map(|e| e.event_type).collect()
    }

    #[tokio::test]
    async fn empty_code_short_circuits_without_submission() {
        let mut session = ScriptedSession::new(vec![]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "   \n\t", cell())
            .await
            .unwrap();

        assert!(session.submitted.is_empty());
        assert_eq!(
            types_of(&sink),
            vec![EventType::ExecuteResult, EventType::ExecutionComplete]
        );
        assert_eq!(sink.events[0].content, json!({"text/plain": ""}));
        assert_eq!(sink.events[1].content, json!({"execution_time": 0}));
        // No ack, no request id on either event.
        assert_eq!(sink.events[0].request_id, None);
    }

    #[tokio::test]
    async fn happy_path_result_then_idle() {
        let mut session = ScriptedSession::new(vec![
            msg(MessageKind::Status, json!({"execution_state": "busy"})),
            msg(
                MessageKind::ExecuteResult,
                json!({"data": {"text/plain": "2"}, "execution_count": 1}),
            ),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "1+1", cell())
            .await
            .unwrap();

        assert_eq!(session.submitted, vec!["1+1".to_string()]);
        assert_eq!(
            types_of(&sink),
            vec![
                EventType::ExecAck,
                EventType::ExecuteResult,
                EventType::ExecutionComplete,
            ]
        );
        assert_eq!(sink.events[0].content, json!({"ok": true}));
        assert_eq!(sink.events[1].content, json!({"text/plain": "2"}));
        assert_eq!(sink.events[1].execution_count, Some(1));
        // Count learned from the result sticks to the terminal event.
        assert_eq!(sink.events[2].execution_count, Some(1));
        for event in &sink.events {
            assert_eq!(event.cell_id, cell());
            assert_eq!(
                event.request_id,
                Some(RequestId::from_string(REQ.into()))
            );
        }
    }

    #[tokio::test]
    async fn timeouts_re_arm_the_loop() {
        let mut session = ScriptedSession::new(vec![
            Ok(None),
            Ok(None),
            msg(MessageKind::Stream, json!({"name": "stdout", "text": "hi\n"})),
            Ok(None),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "print('hi')", cell())
            .await
            .unwrap();

        assert_eq!(
            types_of(&sink),
            vec![
                EventType::ExecAck,
                EventType::Stream,
                EventType::ExecutionComplete,
            ]
        );
        assert_eq!(
            sink.events[1].content,
            json!({"name": "stdout", "text": "hi\n"})
        );
    }

    #[tokio::test]
    async fn foreign_parent_messages_produce_no_events() {
        let mut session = ScriptedSession::new(vec![
            foreign(MessageKind::Stream, json!({"name": "stdout", "text": "leak"})),
            foreign(MessageKind::Error, json!({"ename": "Boom"})),
            foreign(MessageKind::Status, json!({"execution_state": "idle"})),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "x", cell())
            .await
            .unwrap();

        assert_eq!(
            types_of(&sink),
            vec![EventType::ExecAck, EventType::ExecutionComplete]
        );
    }

    #[tokio::test]
    async fn kernel_error_does_not_end_the_loop() {
        let mut session = ScriptedSession::new(vec![
            msg(
                MessageKind::Error,
                json!({"ename": "ZeroDivisionError", "evalue": "division by zero", "traceback": ["tb"]}),
            ),
            msg(MessageKind::Stream, json!({"name": "stderr", "text": "after"})),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "1/0", cell())
            .await
            .unwrap();

        assert_eq!(
            types_of(&sink),
            vec![
                EventType::ExecAck,
                EventType::Error,
                EventType::Stream,
                EventType::ExecutionComplete,
            ]
        );
        assert_eq!(
            sink.events[1].content,
            json!({"ename": "ZeroDivisionError", "evalue": "division by zero", "traceback": ["tb"]})
        );
    }

    #[tokio::test]
    async fn poll_fault_still_reaches_terminal_event() {
        let mut session = ScriptedSession::new(vec![
            msg(MessageKind::Stream, json!({"name": "stdout", "text": "partial"})),
            Err(Error::session("transport died")),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "x", cell())
            .await
            .unwrap();

        assert_eq!(
            types_of(&sink),
            vec![
                EventType::ExecAck,
                EventType::Stream,
                EventType::Error,
                EventType::ExecutionComplete,
            ]
        );
    }

    #[tokio::test]
    async fn submit_failure_emits_error_and_terminal_without_ack() {
        let mut session = ScriptedSession::new(vec![]);
        session.fail_submit = true;
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "x", cell())
            .await
            .unwrap();

        assert_eq!(
            types_of(&sink),
            vec![EventType::Error, EventType::ExecutionComplete]
        );
        assert_eq!(sink.events[0].cell_id, cell());
    }

    #[tokio::test]
    async fn image_payload_yields_path_even_when_corrupt() {
        let mut session = ScriptedSession::new(vec![
            msg(
                MessageKind::DisplayData,
                json!({"data": {"image/png": "%%% corrupt %%%", "text/plain": "<Figure>"}}),
            ),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "plot()", cell())
            .await
            .unwrap();

        assert_eq!(sink.events[1].event_type, EventType::DisplayData);
        assert_eq!(sink.events[1].content["type"], json!("image/png"));
        let path = sink.events[1].content["path"].as_str().unwrap();
        assert!(!path.is_empty());
    }

    #[tokio::test]
    async fn update_display_data_maps_to_display_data_event() {
        let mut session = ScriptedSession::new(vec![
            msg(
                MessageKind::UpdateDisplayData,
                json!({"data": {"text/html": "<b>hi</b>"}}),
            ),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "display()", cell())
            .await
            .unwrap();

        assert_eq!(sink.events[1].event_type, EventType::DisplayData);
        assert_eq!(sink.events[1].content["type"], json!("html"));
    }

    #[tokio::test]
    async fn clear_output_wait_flag_passes_through() {
        let mut session = ScriptedSession::new(vec![
            msg(MessageKind::ClearOutput, json!({"wait": true})),
            idle(),
        ]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "clear()", cell())
            .await
            .unwrap();

        assert_eq!(sink.events[1].event_type, EventType::ClearOutput);
        assert_eq!(sink.events[1].content, json!({"wait": true}));
    }

    #[tokio::test]
    async fn execution_time_is_a_non_negative_integer() {
        let mut session = ScriptedSession::new(vec![idle()]);
        let mut sink = CaptureSink::default();

        engine()
            .run(&mut session, &mut sink, "x", cell())
            .await
            .unwrap();

        let last = sink.events.last().unwrap();
        assert!(last.content["execution_time"].is_u64());
    }

    #[tokio::test]
    async fn cancellation_still_emits_terminal_event() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = std::env::temp_dir();
        let engine = ExecutionEngine::new(
            ArtifactStore::new(&ArtifactConfig { dir: Some(dir) }),
            Duration::from_millis(10),
            cancel,
        );
        // Endless timeouts: only cancellation can end this loop.
        let mut session = ScriptedSession::new((0..10_000).map(|_| Ok(None)).collect());
        let mut sink = CaptureSink::default();

        engine
            .run(&mut session, &mut sink, "while True: pass", cell())
            .await
            .unwrap();

        assert_eq!(
            sink.events.last().unwrap().event_type,
            EventType::ExecutionComplete
        );
    }
}
