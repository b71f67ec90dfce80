//! Crate error type.

use thiserror::Error;

/// Errors raised by the reconciliation engine and its collaborators.
///
/// Record-level problems (a malformed line, an unresolved reference) are not
/// errors: they are skipped and counted in [`crate::core::normalize::SkipCounts`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The per-tenant configuration record is absent.
    #[error("tenant configuration not found at '{key}'")]
    MissingTenantConfig { key: String },

    /// The tenant configuration exists but lacks a required field.
    #[error("invalid tenant configuration: {0}")]
    InvalidTenantConfig(String),

    /// A primary input document (sheet, inventory snapshot) is absent.
    #[error("required input not found at '{key}'")]
    MissingInput { key: String },

    /// The sheet does not have enough columns to locate the attachment cells.
    #[error("sheet has insufficient columns: found {found}, need {required}")]
    InsufficientColumns { found: usize, required: usize },

    /// An attachment already has a different route table assigned.
    #[error(
        "attachment {attachment} is already mapped to '{existing}', refusing to remap to '{requested}'"
    )]
    MappingAlreadyExists {
        attachment: String,
        existing: String,
        requested: String,
    },

    /// A task record violates the field requirements of its action.
    #[error("invalid task record: {0}")]
    InvalidTask(String),

    #[error("invalid naming pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("storage error at '{key}': {source}")]
    Storage {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sheet parse error: {0}")]
    Sheet(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The infrastructure document could not be emitted or read back.
    #[error("document error: {0}")]
    Document(#[from] serde_yaml::Error),

    #[error("report encoding error: {0}")]
    Report(String),

    /// A call against the routing fabric failed.
    #[error("fabric operation failed for {target}: {message}")]
    Fabric { target: String, message: String },
}

impl ReconcileError {
    /// Whether this error aborts the whole run (as opposed to skipping one attachment).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReconcileError::Fabric { .. })
    }

    /// Whether rerunning the same invocation could succeed without changing inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::Storage { .. } | ReconcileError::Fabric { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ReconcileError::InsufficientColumns {
            found: 3,
            required: 4,
        };
        assert!(err.to_string().contains("found 3"));

        let err = ReconcileError::MappingAlreadyExists {
            attachment: "tgw-attach-0a1".into(),
            existing: "acme-prd-tokyo-asp01-01-tgw-rtb".into(),
            requested: "acme-prd-tokyo-asp01-02-tgw-rtb".into(),
        };
        assert!(err.to_string().contains("tgw-attach-0a1"));
        assert!(err.to_string().contains("asp01-02"));
    }

    #[test]
    fn fabric_failures_are_not_fatal() {
        let err = ReconcileError::Fabric {
            target: "tgw-attach-0a1".into(),
            message: "AccessDenied".into(),
        };
        assert!(!err.is_fatal());
        assert!(err.is_retryable());

        let err = ReconcileError::MissingTenantConfig {
            key: "acme/extractsheet/tgw_id_config.jsonl".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }
}
