use thiserror::Error;

/// The closed error taxonomy of the knowledge graph core (spec §7).
///
/// Every fallible operation in every crate of this workspace returns
/// [`Result<T>`], which is this error type. Kinds are grouped the way §7
/// groups them (validation, reference, external provider, storage,
/// quota/time, operational) but are flattened into one enum, matching
/// `codegraph_core::error::CodeGraphError`'s style.
#[derive(Error, Debug)]
pub enum CoreError {
    // --- Validation ---
    #[error("schema validation failed on attribute '{attribute}': {reason}")]
    SchemaValidationError { attribute: String, reason: String },

    #[error("invalid semver string '{0}'")]
    SemverFormatError(String),

    #[error("duplicate name: {0}")]
    DuplicateNameError(String),

    #[error("attribute '{attribute}' has the wrong type: expected {expected}, got {actual}")]
    AttributeTypeError {
        attribute: String,
        expected: String,
        actual: String,
    },

    // --- Reference ---
    #[error("project not found: {0}")]
    ProjectNotFoundError(uuid::Uuid),

    #[error("schema not found: {0}")]
    SchemaNotFoundError(String),

    #[error("node not found: {0}")]
    NodeNotFoundError(uuid::Uuid),

    #[error("document not found: {0}")]
    DocumentNotFoundError(uuid::Uuid),

    #[error("schema '{0}' is in use and cannot be deleted")]
    SchemaInUseError(String),

    // --- External provider ---
    #[error("LLM endpoint unavailable: {0}")]
    LLMUnavailableError(String),

    #[error("NER service unavailable: {0}")]
    NERUnavailableError(String),

    #[error("embedding backend failed: {0}")]
    EmbeddingBackendError(String),

    #[error("graph mirror operation failed: {0}")]
    GraphMirrorError(String),

    // --- Storage ---
    #[error("conflict: {0}")]
    ConflictError(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailableError(String),

    #[error("storage operation timed out: {0}")]
    StorageTimeoutError(String),

    // --- Quota / time ---
    #[error("rate limited: {0}")]
    RateLimitedError(String),

    #[error("operation exceeded its time budget: {0}")]
    TimeoutExceededError(String),

    // --- Operational ---
    #[error("document could not be read: {0}")]
    DocumentUnreadableError(String),

    #[error("operation cancelled: {0}")]
    CancelledError(String),

    // --- Passthrough for collaborators expressed via serde/io ---
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Stable machine name for the error kind, used in logs and in
    /// `ConstructionStats`/`AnswerResult` diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CoreError::SchemaValidationError { .. } => "SchemaValidationError",
            CoreError::SemverFormatError(_) => "SemverFormatError",
            CoreError::DuplicateNameError(_) => "DuplicateNameError",
            CoreError::AttributeTypeError { .. } => "AttributeTypeError",
            CoreError::ProjectNotFoundError(_) => "ProjectNotFoundError",
            CoreError::SchemaNotFoundError(_) => "SchemaNotFoundError",
            CoreError::NodeNotFoundError(_) => "NodeNotFoundError",
            CoreError::DocumentNotFoundError(_) => "DocumentNotFoundError",
            CoreError::SchemaInUseError(_) => "SchemaInUseError",
            CoreError::LLMUnavailableError(_) => "LLMUnavailableError",
            CoreError::NERUnavailableError(_) => "NERUnavailableError",
            CoreError::EmbeddingBackendError(_) => "EmbeddingBackendError",
            CoreError::GraphMirrorError(_) => "GraphMirrorError",
            CoreError::ConflictError(_) => "ConflictError",
            CoreError::StorageUnavailableError(_) => "StorageUnavailableError",
            CoreError::StorageTimeoutError(_) => "StorageTimeoutError",
            CoreError::RateLimitedError(_) => "RateLimitedError",
            CoreError::TimeoutExceededError(_) => "TimeoutExceededError",
            CoreError::DocumentUnreadableError(_) => "DocumentUnreadableError",
            CoreError::CancelledError(_) => "CancelledError",
            CoreError::Serialization(_) => "Serialization",
            CoreError::Io(_) => "Io",
        }
    }

    /// Whether this error kind is considered transient and worth retrying
    /// with backoff (§7 "Recovered locally").
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::StorageUnavailableError(_)
                | CoreError::StorageTimeoutError(_)
                | CoreError::LLMUnavailableError(_)
                | CoreError::NERUnavailableError(_)
                | CoreError::RateLimitedError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_is_stable() {
        let err = CoreError::ConflictError("dup".into());
        assert_eq!(err.kind_name(), "ConflictError");
    }

    #[test]
    fn transient_classification() {
        assert!(CoreError::StorageUnavailableError("x".into()).is_transient());
        assert!(!CoreError::SchemaInUseError("x".into()).is_transient());
    }
}
