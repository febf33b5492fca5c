//! Host-facing wire surface: commands in, events out.

pub mod command;
pub mod event;

pub use command::{Command, CommandReader, ReadOutcome};
pub use event::{EventSink, EventType, OutgoingEvent, StdoutSink};
