//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed host command (recoverable; reported as an `error` event).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Kernel-reported execution error (forwarded to the host, not a bridge fault).
    #[error("kernel error: {0}")]
    Kernel(String),

    /// Transport or submission fault on the kernel session.
    #[error("session error: {0}")]
    Session(String),

    /// Kernel could not be started. The only fatal path in the system.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn kernel(msg: impl Into<String>) -> Self {
        Self::Kernel(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Self::Bootstrap(msg.into())
    }

    /// Whether this error should terminate the process.
    ///
    /// Everything except a bootstrap failure is recovered in place: reported
    /// as an `error` event on stdout while the dispatch loop keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Bootstrap(_))
    }
}
