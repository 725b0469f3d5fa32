//! Typed error taxonomy for the external-memory substrate.
//!
//! Every public operation returns `Result<T>` with this `Error` as the
//! failure type. Internal helpers may chain `anyhow`-style context while
//! building one of these variants, but the typed error is what crosses
//! the public API boundary (see SPEC_FULL.md section 7).

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Kind of I/O operation that failed, used by [`Error::Io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    Open,
    Read,
    Write,
    Seek,
    Align,
    Cancelled,
    Corruption,
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoErrorKind::Open => "open",
            IoErrorKind::Read => "read",
            IoErrorKind::Write => "write",
            IoErrorKind::Seek => "seek",
            IoErrorKind::Align => "align",
            IoErrorKind::Cancelled => "cancelled",
            IoErrorKind::Corruption => "corruption",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error during {kind} at offset {offset:?}: {message}")]
    Io {
        kind: IoErrorKind,
        offset: Option<u64>,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("alignment violation: {message}")]
    Alignment { message: String },

    #[error("out of external memory: requested {requested} bytes, {free} free")]
    OutOfExternalMemory { requested: u64, free: u64 },

    #[error("double free at offset {offset}, size {size}")]
    DoubleFree { offset: u64, size: u64 },

    #[error("disk allocator corruption: {message}")]
    Corruption { message: String },

    #[error("state violation: {message}")]
    StateViolation { message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("internal invariant failure: {message}")]
    InvariantFailure { message: String },

    #[error("disk path invalid: {0}")]
    InvalidConfig(PathBuf),
}

impl Error {
    pub fn io(kind: IoErrorKind, message: impl Into<String>) -> Self {
        Error::Io {
            kind,
            offset: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn io_at(kind: IoErrorKind, offset: u64, message: impl Into<String>) -> Self {
        Error::Io {
            kind,
            offset: Some(offset),
            message: message.into(),
            source: None,
        }
    }

    pub fn io_from(kind: IoErrorKind, offset: u64, source: io::Error) -> Self {
        Error::Io {
            kind,
            offset: Some(offset),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(false, "invariant failure: {message}");
        Error::InvariantFailure { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
