//! Host command parsing — one JSON command per stdin line.
//!
//! Malformed input is recoverable, never fatal: a line that fails to parse is
//! reported as an `error` event (generic message, no `cell_id`) and the
//! reader keeps going. End-of-stream is surfaced as `EndOfInput`, which the
//! controller treats identically to an explicit `shutdown` command.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

use crate::protocol::event::{EventSink, EventType, OutgoingEvent};
use crate::types::{CellId, Result};

/// Commands accepted from the host.
///
/// `Unknown` absorbs actions this version doesn't understand so newer hosts
/// don't break older bridges; the controller treats it as a no-op.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Execute {
        #[serde(default)]
        code: String,
        #[serde(default)]
        cell_id: Option<CellId>,
    },
    Shutdown,
    ListKernels,
    #[serde(other)]
    Unknown,
}

/// Outcome of one read attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Command(Command),
    EndOfInput,
}

/// Reads newline-terminated commands from the host.
#[derive(Debug)]
pub struct CommandReader<R> {
    input: R,
    line: String,
}

impl CommandReader<BufReader<Stdin>> {
    /// Reader over the process stdin.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> CommandReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }

    /// Read the next well-formed command.
    ///
    /// Loops past malformed lines, emitting one `error` event per bad line.
    /// Returns `Err` only if the sink itself fails; a read error on stdin is
    /// logged and treated as end of input.
    pub async fn read_next(&mut self, sink: &mut dyn EventSink) -> Result<ReadOutcome> {
        loop {
            self.line.clear();
            let n = match self.input.read_line(&mut self.line).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("stdin read error, treating as end of input: {}", e);
                    return Ok(ReadOutcome::EndOfInput);
                }
            };
            if n == 0 {
                return Ok(ReadOutcome::EndOfInput);
            }

            match serde_json::from_str::<Command>(&self.line) {
                Ok(command) => return Ok(ReadOutcome::Command(command)),
                Err(e) => {
                    tracing::warn!("malformed command line: {}", e);
                    sink.emit(OutgoingEvent::new(
                        EventType::Error,
                        serde_json::json!({"evalue": "invalid command JSON"}),
                    ))
                    .await?;
                }
            }
        }
    }
}
