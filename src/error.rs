use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of archive processing an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    Header,
    NameTable,
    Descriptors,
    Extraction,
}

impl fmt::Display for ParsePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParsePhase::Header => "header",
            ParsePhase::NameTable => "name table",
            ParsePhase::Descriptors => "descriptor table",
            ParsePhase::Extraction => "extraction",
        };
        f.write_str(name)
    }
}

/// Errors raised while reading or extracting a MEG archive.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive path does not exist.
    #[error("archive not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// OS-level failure with a note on what was being done.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    RawIo(#[from] std::io::Error),

    /// Structural violation of the container format.
    #[error("malformed archive ({phase}): {reason}")]
    Malformed { phase: ParsePhase, reason: String },

    #[error("extraction cancelled")]
    Cancelled,
}

impl Error {
    pub fn malformed(phase: ParsePhase, reason: impl Into<String>) -> Self {
        Error::Malformed {
            phase,
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InputNotFound(_) => -2,
            Error::Malformed { .. } => -3,
            Error::Io { .. } | Error::RawIo(_) => -4,
            Error::Cancelled => -5,
        }
    }

    /// Parse phase, when the error is structural.
    pub fn phase(&self) -> Option<ParsePhase> {
        match self {
            Error::Malformed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
