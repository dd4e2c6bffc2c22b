//! Error types for the sampling engine.
//!
//! Only [`Error::BackendUnavailable`] escapes [`crate::MetricsPublisher::open`].
//! A sensor that is not present is not an error: the role stays unresolved
//! and the sample carries `0` or [`crate::NO_POWER_SENSOR`]. An adapter that
//! cannot be resolved falls back to the aggregate counter. Everything else
//! is a transient tick failure that is logged and skipped.

use crate::backend::{NodeId, SensorHandle};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening backends or sampling.
#[derive(Error, Debug)]
pub enum Error {
    /// The hardware or counter backend could not be initialized.
    #[error("Hardware backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend was used after `close()`.
    #[error("Hardware backend is closed")]
    BackendClosed,

    /// A sensor handle that the backend does not know.
    #[error("Unknown sensor handle: {0}")]
    UnknownSensor(SensorHandle),

    /// A hardware node that the backend does not know.
    #[error("Unknown hardware node: {0}")]
    UnknownNode(NodeId),

    /// The bound network adapter no longer exists.
    #[error("Network adapter vanished: {0}")]
    AdapterVanished(String),

    /// A counter could not be read or parsed.
    #[error("Counter read failed: {0}")]
    Counter(String),

    /// I/O error while reading a counter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend panicked during a tick.
    #[error("Sampling tick panicked: {0}")]
    TickPanicked(String),

    /// `start()` was called outside a tokio runtime.
    #[error("No tokio runtime: {0}")]
    Runtime(String),

    /// The engine was used after `close()`.
    #[error("Engine is closed")]
    Closed,
}

impl Error {
    /// Returns true if the error means the bound network adapter must be
    /// selected again.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::AdapterVanished(_))
    }
}
