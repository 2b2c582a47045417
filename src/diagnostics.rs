//! Call-scoped diagnostic log for recoverable decode problems.
//!
//! Codecs never abort on chunk-local damage. Instead they record an entry here
//! and carry on; the log is handed back with the result (or attached to the
//! fatal error) so callers can show what was skipped and why.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Severity {
    Debug,
    Warning,
}

/// Machine-checkable classification of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DiagnosticCode {
    /// A chunk declares a payload that runs past the end of the buffer.
    PayloadExceedsBuffer,
    /// Following a chunk's `next` link landed outside the buffer.
    SeekFailed,
    /// Fewer than 16 bytes remained where a chunk header was expected.
    TruncatedHeader,
    /// A `next` link pointed back into (or before) the current header.
    NonAdvancingLink,
    /// No candidate stride evenly divides a vertex payload.
    FormatUndetected,
    /// Vertex records could not be read from the payload.
    VertexReadFailed,
    /// A triangle referenced a vertex that does not exist.
    IndexOutOfRange,
    /// A face chunk arrived with no pending vertex buffer for its category.
    OrphanFaces,
    /// A metadata chunk was too short or otherwise unreadable.
    MetadataParseFailed,
    /// Assembled totals disagree with counts declared in metadata.
    DeclaredCountMismatch,
    /// A chunk carried a tag this crate does not interpret.
    UnknownChunk,
    /// A chunk was dropped without producing geometry.
    ChunkSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub context: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {:?}: {}", self.severity, self.code, self.context)
    }
}

/// Ordered list of diagnostics produced by a single codec call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and forward it to `tracing` at the matching level.
    pub fn record(&mut self, severity: Severity, code: DiagnosticCode, context: impl Into<String>) {
        let context = context.into();
        match severity {
            Severity::Debug => debug!(?code, "{context}"),
            Severity::Warning => warn!(?code, "{context}"),
        }
        self.entries.push(Diagnostic {
            severity,
            code,
            context,
        });
    }

    pub fn warn(&mut self, code: DiagnosticCode, context: impl Into<String>) {
        self.record(Severity::Warning, code, context);
    }

    pub fn debug(&mut self, code: DiagnosticCode, context: impl Into<String>) {
        self.record(Severity::Debug, code, context);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries carrying `code`.
    pub fn count(&self, code: DiagnosticCode) -> usize {
        self.entries.iter().filter(|d| d.code == code).count()
    }

    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.entries.iter().any(|d| d.code == code)
    }
}

impl fmt::Display for DiagnosticLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
