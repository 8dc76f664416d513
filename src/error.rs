//! Error types for the similarity pipeline.
//!
//! Algorithmic edge cases (empty sequences, ties, sequences removed by the
//! temporal filter) are not errors. Errors are reserved for bad caller input
//! and for stores that report impossible values.

/// Coarse classification used by batch callers to decide whether to skip a
/// subject pair or abort the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Missing or malformed arguments. Nothing was computed.
    InvalidInput,
    /// The store returned a value that cannot be right (e.g. zero stay points).
    DataInconsistency,
    /// The store itself failed.
    Store,
}

/// Errors raised by extraction, matching and analysis.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimilarityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("store error: {0}")]
    Store(String),
}

impl SimilarityError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::UnknownSubject(_) => ErrorKind::InvalidInput,
            Self::DataInconsistency(_) => ErrorKind::DataInconsistency,
            Self::Store(_) => ErrorKind::Store,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SimilarityError>;

/// Reject empty or whitespace-only subject identifiers.
pub(crate) fn require_subject(subject: &str, role: &str) -> Result<()> {
    if subject.trim().is_empty() {
        return Err(SimilarityError::InvalidInput(format!(
            "{} subject identifier is missing",
            role
        )));
    }
    Ok(())
}
