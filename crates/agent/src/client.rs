//! HTTP transport for the Agent API (§4.G step 5, §6).

use std::time::Duration;

use crate::error::{AgentError, AgentRequestDiagnostics};
use crate::types::{ApiResponse, AgentRequest};

/// Maximum total attempts for one logical Agent call (one initial try + retries).
const MAX_ATTEMPTS: u32 = 4;
/// Base delay between retries; doubled on each subsequent attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Thin `reqwest`-based client for the Agent HTTP API.
///
/// Retry, timeout, and HTTP error classification live here, outside the
/// gateway's request-building logic, matching the donor codebase's split
/// between a narrow HTTP client and the richer service that builds its
/// requests.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AgentClient {
    /// Creates a new client with a 30s request timeout.
    #[must_use]
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, api_key, base_url }
    }

    /// Posts `request` to the Agent's chat endpoint, retrying transient
    /// failures (network errors, 429, 5xx) up to [`MAX_ATTEMPTS`] times
    /// with exponential backoff. Non-transient failures (4xx other than
    /// 429) return immediately.
    pub async fn invoke(&self, request: &AgentRequest) -> Result<ApiResponse, AgentError> {
        let url = format!("{}/v1/chat", self.base_url.trim_end_matches('/'));
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(AgentError::HttpRequest(e));
                    continue;
                },
            };

            let status = response.status();
            if status.is_success() {
                let body = response.text().await.map_err(AgentError::HttpRequest)?;
                return serde_json::from_str(&body)
                    .map_err(|source| AgentError::JsonParse { context: "ApiResponse".to_owned(), source });
            }

            let body = response.text().await.unwrap_or_default();
            let err = AgentError::from_status(status.as_u16(), &body, self.request_diagnostics(request));
            if !err.is_transient() {
                return Err(err);
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| {
            AgentError::from_status(0, "retries exhausted", self.request_diagnostics(request))
        }))
    }

    /// Builds the masked-key/headers/body diagnostics attached to an
    /// [`AgentError::InvocationError`] for alerting (§4.G step 7).
    pub(crate) fn request_diagnostics(&self, request: &AgentRequest) -> AgentRequestDiagnostics {
        AgentRequestDiagnostics {
            masked_api_key: AgentRequestDiagnostics::mask_api_key(&self.api_key),
            headers: vec![
                ("Authorization".to_owned(), "Bearer ***".to_owned()),
                ("Content-Type".to_owned(), "application/json".to_owned()),
            ],
            body: serde_json::to_string(request).unwrap_or_default(),
        }
    }
}

/// Truncates a string to the given maximum length at a char boundary.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        s.get(..end).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::AgentClient;
    use crate::types::{AgentRequest, SimpleMessage};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AgentRequest {
        AgentRequest {
            conversation_id: "c1".to_owned(),
            user_message: "hi".to_owned(),
            messages: vec![SimpleMessage { role: "user".to_owned(), content: "hi".to_owned() }],
            model: None,
            system_prompt: None,
            prompt_type: "CANDIDATE_CONSULTATION".to_owned(),
            allowed_tools: None,
            context: serde_json::json!({}),
            tool_context: None,
            context_strategy: None,
            prune: None,
            prune_options: None,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let server = MockServer::start().await;
        let client = AgentClient::new("key".to_owned(), server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {"messages": [], "tools": {"used": [], "skipped": []}},
            })))
            .mount(&server)
            .await;

        let response = client.invoke(&request()).await.unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        let client = AgentClient::new("key".to_owned(), server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {"messages": [], "tools": {"used": [], "skipped": []}},
            })))
            .mount(&server)
            .await;

        let response = client.invoke(&request()).await.unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn does_not_retry_on_401() {
        let server = MockServer::start().await;
        let client = AgentClient::new("key".to_owned(), server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, crate::error::AgentError::InvocationError { code, .. } if code == "auth_error"));
        assert!(err.diagnostics().is_some());
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_503() {
        let server = MockServer::start().await;
        let client = AgentClient::new("key".to_owned(), server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(4)
            .mount(&server)
            .await;

        let err = client.invoke(&request()).await;
        assert!(err.is_err());
    }
}
