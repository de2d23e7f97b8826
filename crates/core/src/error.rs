use thiserror::Error;

#[derive(Debug, Error)]
pub enum TuneError {
    /// Unknown model or request.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A model descriptor exists but is missing required fields.
    #[error("corrupt descriptor {path}: {reason}")]
    CorruptDescriptor { path: String, reason: String },

    /// Token or header not accepted by the model, or a parameter out of range.
    #[error("invalid submission: {0}")]
    Validation(String),

    /// The normalizer or engine could not run, or reported errors.
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    /// Shared state found in an inconsistent state (e.g. a poisoned lock).
    #[error("concurrency fault: {0}")]
    Concurrency(String),

    /// A request record was asked to break one of its lifecycle rules.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TuneError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
