//! Error types for pulsewise-core

use thiserror::Error;

/// Main error type for the pulsewise-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input, with the offending field
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Instance, conversation or template id does not resolve
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Principal may not act on this resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Operation is incompatible with the entity's current state
    #[error("{entity} {id} is {state}")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
    },

    /// Conversation was handed over to a human
    #[error("conversation {conversation_id} is already escalated, HR will follow up")]
    Escalated { conversation_id: String },

    /// Lost a create-if-absent race
    #[error("{entity} already exists for {key}")]
    Conflict { entity: &'static str, key: String },

    /// Sentiment classifier failed
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Connection mutex was poisoned by a panicking holder
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(
        entity: &'static str,
        id: impl Into<String>,
        state: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidState {
            entity,
            id: id.into(),
            state: state.to_string(),
        }
    }

    /// Whether the caller should treat this as "already exists, skip".
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Result type alias for pulsewise-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalated_message_mentions_hr() {
        let err = Error::Escalated {
            conversation_id: "c1".to_string(),
        };
        assert!(err.to_string().contains("HR will follow up"));
    }

    #[test]
    fn test_invalid_state_names_state() {
        let err = Error::invalid_state("conversation", "c1", "closed");
        assert_eq!(err.to_string(), "conversation c1 is closed");
        assert!(!err.is_conflict());
    }
}
