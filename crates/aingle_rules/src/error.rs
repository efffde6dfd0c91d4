//! Error types for the AIngle rule engine.

use thiserror::Error;

/// A specialized `Result` type for rule engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Defines the errors that can occur while defining rulesets, asserting facts
/// and running episodes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An operation named a ruleset that was never registered (or was torn down).
    #[error("Invalid ruleset: {0}")]
    InvalidRuleset(String),

    /// A ruleset with this name is already registered.
    #[error("Duplicate ruleset: {0}")]
    DuplicateRuleset(String),

    /// A fact was structurally invalid or carried a value whose type does not
    /// fit an ordering comparison made on that field.
    #[error("Malformed fact: {0}")]
    MalformedFact(String),

    /// An episode kept firing rules past the configured bound.
    #[error("Rule cycle exceeded in ruleset '{ruleset}': more than {limit} firings")]
    RuleCycleExceeded {
        /// Ruleset whose episode was aborted.
        ruleset: String,
        /// The configured firing bound.
        limit: usize,
    },

    /// A rule action returned an error; the episode was aborted.
    #[error("Action of rule '{rule}' failed: {message}")]
    ActionFailure {
        /// Name of the failing rule.
        rule: String,
        /// What the action reported.
        message: String,
    },

    /// A rule was defined incorrectly.
    #[error("Invalid rule definition: {0}")]
    InvalidRule(String),

    /// A lock guarding engine state was poisoned by a panicking action.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// An error occurred during data serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Builds an `ActionFailure` from inside an action.
    ///
    /// The rule name is filled in by the engine when the error surfaces, so
    /// actions only need to describe what went wrong.
    pub fn action(message: impl Into<String>) -> Self {
        Error::ActionFailure {
            rule: String::new(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidRuleset("computers".to_string());
        assert!(err.to_string().contains("computers"));
    }

    #[test]
    fn test_cycle_error_display() {
        let err = Error::RuleCycleExceeded {
            ruleset: "loop".to_string(),
            limit: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("loop"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn test_action_helper() {
        let err = Error::action("disk on fire");
        match err {
            Error::ActionFailure { rule, message } => {
                assert!(rule.is_empty());
                assert_eq!(message, "disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
