// src/error.rs

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error classes surfaced by the workload engine.
///
/// `Config` and `NoObjects` are fatal at startup. `Io` and `ShortWrite` are
/// reported to the runner error channel and shut the run down when received.
/// `Cancelled` is clean, expected termination and never treated as a failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    #[error("no existing objects found under store root")]
    NoObjects,

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the clean-shutdown pseudo-error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
