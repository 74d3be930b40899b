//! Typed error enum for the Agent gateway.

use thiserror::Error;

/// Request diagnostics attached to an [`AgentError::InvocationError`] for
/// alerting (§4.G step 7): enough to let a human reproduce the failed
/// call without the alert itself leaking the real API key.
#[derive(Debug, Clone)]
pub struct AgentRequestDiagnostics {
    /// The API key used for this call, with all but its last 4 characters
    /// replaced by `*`.
    pub masked_api_key: String,
    /// Request headers sent to the Agent, as `(name, value)` pairs.
    pub headers: Vec<(String, String)>,
    /// JSON-encoded request body sent to the Agent.
    pub body: String,
}

impl AgentRequestDiagnostics {
    /// Masks `api_key`, keeping only its last 4 characters visible.
    #[must_use]
    pub fn mask_api_key(api_key: &str) -> String {
        let visible = 4;
        if api_key.len() <= visible {
            "*".repeat(api_key.len())
        } else {
            let tail = &api_key[api_key.len() - visible..];
            format!("{}{tail}", "*".repeat(api_key.len() - visible))
        }
    }
}

/// Errors surfaced by the Agent gateway (§4.G, §7).
///
/// Variants map directly onto the `agent` alert-kind taxonomy and the
/// alert-level classification table in §4.I.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The Agent POST (§4.G step 5) returned a non-2xx response, or
    /// retries were exhausted (§4.G step 7 `AgentInvocationError`).
    /// `code` is one of `auth_error`, `rate_limited`, `config_error`,
    /// `other`; `retryable` mirrors [`AgentError::is_transient`].
    #[error("agent invocation error ({code}): {message} (retryable={retryable})")]
    InvocationError {
        /// Short machine-readable failure discriminant.
        code: String,
        /// Human-readable failure detail, usually the response body.
        message: String,
        /// Whether a bounded retry is worth attempting.
        retryable: bool,
        /// Masked API key, request headers, and request body (§4.G step 7),
        /// for alerting — deliberately excluded from the `Display` message
        /// above so diagnostics never end up in a plain log line.
        diagnostics: AgentRequestDiagnostics,
    },
    /// Scenario profile missing required fields or invalid context schema (§4.G step 1).
    #[error("agent config error: {0}")]
    ConfigError(String),
    /// History/context could not be assembled for the request.
    #[error("agent context missing: {0}")]
    ContextMissing(String),
    /// Low-level transport failure.
    #[error("agent http request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),
    /// Response body did not parse into the expected shape.
    #[error("agent response parse error in {context}: {source}")]
    JsonParse {
        /// Where in the response parsing failed.
        context: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// The Agent's `messages` array had no assistant turn, or its text was empty (§4.G step 9).
    #[error("agent returned no usable reply text")]
    EmptyReply,
}

impl AgentError {
    /// Whether a bounded retry is worth attempting.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HttpRequest(_) | Self::InvocationError { retryable: true, .. })
    }

    /// Classifies an HTTP status/body pair from a failed Agent POST into
    /// an [`AgentError::InvocationError`] carrying `diagnostics` (§4.G step 5, 7).
    #[must_use]
    pub fn from_status(status: u16, body: &str, diagnostics: AgentRequestDiagnostics) -> Self {
        let (code, retryable) = match status {
            401 | 403 => ("auth_error", false),
            429 => ("rate_limited", true),
            400 | 422 => ("config_error", false),
            _ => ("other", false),
        };
        Self::InvocationError { code: code.to_owned(), message: body.to_owned(), retryable, diagnostics }
    }

    /// Request diagnostics for alerting, if this is an
    /// [`AgentError::InvocationError`] (§4.G step 7).
    #[must_use]
    pub fn diagnostics(&self) -> Option<&AgentRequestDiagnostics> {
        match self {
            Self::InvocationError { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}
