//! Error types for AgentPay
//!
//! Every failed operation is explicit; nothing is silently skipped.
//! Transient and permanent delivery failures are absorbed by the webhook
//! engine and never surface here - they are reflected through counters,
//! the event log, and delivery signals instead.

use thiserror::Error;

/// Result type for AgentPay operations
pub type Result<T> = std::result::Result<T, AgentPayError>;

/// AgentPay error types
#[derive(Debug, Clone, Error)]
pub enum AgentPayError {
    /// Syntactic failure: malformed URL, bad repo reference, non-positive
    /// amount, unsupported token
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Caller identifier does not match the required role
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Current state rejects the operation; carries the current state for
    /// diagnostics
    #[error("Precondition violated: {reason} (current state: {state})")]
    PreconditionViolated { reason: String, state: String },

    /// Escrow not found
    #[error("Escrow {escrow_id} not found")]
    EscrowNotFound { escrow_id: String },

    /// Quote not found
    #[error("Quote {quote_id} not found")]
    QuoteNotFound { quote_id: String },

    /// Subscription not found
    #[error("Subscription {subscription_id} not found")]
    SubscriptionNotFound { subscription_id: String },

    /// Tip not found
    #[error("Tip {tip_id} not found")]
    TipNotFound { tip_id: String },

    /// Event tag not in the closed set
    #[error("Event type {event_type} is not recognized")]
    InvalidEventType { event_type: String },

    /// Subscription attempt with an empty filter after closed-set
    /// intersection
    #[error("No valid event types remain after filtering")]
    NoValidEventTypes,

    /// Snapshot write or read failure
    #[error("Persistence failure: {message}")]
    Persistence { message: String },
}

impl AgentPayError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a precondition error carrying the entity's current state
    pub fn precondition(reason: impl Into<String>, state: impl ToString) -> Self {
        Self::PreconditionViolated {
            reason: reason.into(),
            state: state.to_string(),
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::PreconditionViolated { .. } => "PRECONDITION_VIOLATED",
            Self::EscrowNotFound { .. } => "ESCROW_NOT_FOUND",
            Self::QuoteNotFound { .. } => "QUOTE_NOT_FOUND",
            Self::SubscriptionNotFound { .. } => "SUBSCRIPTION_NOT_FOUND",
            Self::TipNotFound { .. } => "TIP_NOT_FOUND",
            Self::InvalidEventType { .. } => "INVALID_EVENT_TYPE",
            Self::NoValidEventTypes => "NO_VALID_EVENT_TYPES",
            Self::Persistence { .. } => "PERSISTENCE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AgentPayError::precondition("cannot fund", "released");
        assert_eq!(err.error_code(), "PRECONDITION_VIOLATED");
        assert!(err.to_string().contains("released"));
    }

    #[test]
    fn test_invalid_input_message() {
        let err = AgentPayError::invalid_input("amount", "must be positive");
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(err.to_string().contains("amount"));
    }
}
