use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categories of non-fatal build problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Descriptor `type` has no catalog entry; an `Undefined` node stands in
    UnknownType,
    /// A `$ref` or module id could not be resolved; a `BadValue` stands in
    UnresolvedReference,
    /// Typing could not be fetched; the node was typed as `any`
    TypingFallback,
    /// Module resolution ended in error
    ModuleFailed,
    /// A feedback edge was found while ordering a scope
    NotADag,
}

impl DiagnosticKind {
    pub fn is_error(&self) -> bool {
        !matches!(self, DiagnosticKind::TypingFallback)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Arena index of the node the problem is attached to, if any
    pub node: Option<u32>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            node: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, node: u32) -> Self {
        self.node = Some(node);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "[{:?}] #{}: {}", self.kind, node, self.message),
            None => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

/// Collection of diagnostics produced while building a program.
///
/// Every push is also reported through `tracing`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if diagnostic.kind.is_error() {
            tracing::error!("{}", diagnostic);
        } else {
            tracing::warn!("{}", diagnostic);
        }
        self.entries.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.kind.is_error())
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
