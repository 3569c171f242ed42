//! Error and diagnostic types for artifact emission.
//!
//! Emission failures are recoverable: the pass reports them as diagnostics on
//! its outcome and the compile proceeds without the affected artifact.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors raised while writing or decoding instrumentation artifacts.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// The static descriptor directory could not be created.
    #[error("failed to create descriptor directory {dir}: {source}")]
    CreateDir { dir: PathBuf, source: io::Error },
    /// The descriptor file could not be opened or written.
    #[error("failed to write descriptor {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    /// A block record could not be serialized.
    #[error("failed to serialize block record: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A section blob does not divide into whole records.
    #[error("{section} length {len} is not a multiple of {record}")]
    TruncatedSection {
        section: &'static str,
        len: usize,
        record: usize,
    },
}

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A diagnostic attached to a pass outcome.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}", tag, self.message)
    }
}
