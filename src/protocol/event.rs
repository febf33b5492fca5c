//! Outgoing event envelope and sinks.
//!
//! Every event the bridge produces is one JSON object on one stdout line,
//! flushed immediately so the host sees it without buffering delay. Events
//! are immutable once constructed and written exactly once.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use crate::types::{CellId, RequestId, Result};

/// Closed set of event types the host protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Ready,
    ExecAck,
    Stream,
    DisplayData,
    ExecuteResult,
    ClearOutput,
    Error,
    ExecutionComplete,
    KernelSpecs,
}

/// One line of the host-facing output protocol.
///
/// Correlation metadata (`cell_id`, `id`, `execution_count`) is attached only
/// when known; absent fields are omitted from the wire form entirely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,
    #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
}

impl OutgoingEvent {
    pub fn new(event_type: EventType, content: Value) -> Self {
        Self {
            event_type,
            content,
            cell_id: None,
            request_id: None,
            execution_count: None,
        }
    }

    pub fn with_cell(mut self, cell_id: Option<CellId>) -> Self {
        self.cell_id = cell_id;
        self
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_execution_count(mut self, count: Option<i64>) -> Self {
        self.execution_count = count;
        self
    }
}

/// Destination for outgoing events.
///
/// The bridge writes through this seam so the engine and controller can be
/// exercised against an in-memory sink in tests.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: OutgoingEvent) -> Result<()>;
}

/// Production sink: one JSON line per event on stdout, flushed per event.
#[derive(Debug)]
pub struct StdoutSink {
    out: BufWriter<Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: BufWriter::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn emit(&mut self, event: OutgoingEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        // Flush per event: the host blocks on this stream and a buffered
        // event is indistinguishable from a hung kernel.
        self.out.flush().await?;
        Ok(())
    }
}
