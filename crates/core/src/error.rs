//! Typed error enum for the core crate.

use thiserror::Error;

/// Errors originating from core domain type parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Failed to parse a history entry `role` string (§3).
    #[error("invalid role: {0}")]
    InvalidRole(String),
    /// Webhook body matched neither the enterprise nor the group shape (§6).
    #[error("unrecognized webhook shape")]
    UnrecognizedWebhookShape,
    /// Webhook body matched a known shape but failed to decode (§6).
    #[error("webhook decode error: {0}")]
    WebhookDecode(String),
}
