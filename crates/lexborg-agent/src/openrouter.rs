use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lexborg_core::{agent::ChatBackend, config::Config, ChatRequest, FailureKind, QueryAttempt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Calls an OpenRouter-compatible `/chat/completions` endpoint.
///
/// Every call is independent: the backend holds only the pooled HTTP client
/// and immutable settings, so one instance serves all models concurrently.
pub struct OpenRouterBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl OpenRouterBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building chat HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            policy: RetryPolicy::default(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        if config.openrouter_api_key.is_empty() {
            warn!("OPENROUTER_API_KEY is empty, requests will be rejected upstream");
        }
        Ok(Self::new(
            config.openrouter_base_url.clone(),
            config.openrouter_api_key.clone(),
            config.request_timeout(),
        )?
        .with_retry_policy(RetryPolicy::from_config(config)))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send_once(&self, body: &CompletionBody<'_>, attempt: u32) -> Result<String, FailureKind> {
        debug!(model = %body.model, attempt = attempt + 1, "calling chat completions");

        let response = match self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(model = %body.model, "chat request timed out");
                return Err(FailureKind::Other);
            },
            Err(e) => {
                warn!(model = %body.model, "chat request failed: {}", e);
                return Err(FailureKind::Other);
            },
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(model = %body.model, status, "failed to read chat response body: {}", e);
                return Err(FailureKind::Other);
            },
        };

        let result = classify_response(status, &text);
        if let Err(kind) = &result {
            warn!(
                model = %body.model,
                status,
                %kind,
                body = %snippet(&text),
                "chat completion failed"
            );
        }
        result
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl<'a> CompletionBody<'a> {
    fn from_request(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system_prompt,
                },
                Message {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            response_format: request
                .structured_output
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

// ── Classification ───────────────────────────────────────────────────────

/// Map a status code and the upstream error message onto a failure kind.
pub fn classify_status(status: u16, message: &str) -> FailureKind {
    match status {
        400 => {
            let m = message.to_lowercase();
            if m.trim().is_empty() || ["token", "limit", "context", "maximum"].iter().any(|w| m.contains(w)) {
                FailureKind::PayloadTooLarge
            } else {
                FailureKind::Other
            }
        },
        402 => FailureKind::InsufficientCredits,
        413 => FailureKind::PayloadTooLarge,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::ServerError,
        _ => FailureKind::Other,
    }
}

/// Turn one HTTP exchange into the completion text or a failure kind.
///
/// Successful statuses can still carry an `error` object with a numeric
/// `code`; that code is classified as if it were the status.
pub fn classify_response(status: u16, body: &str) -> Result<String, FailureKind> {
    let parsed = serde_json::from_str::<Value>(body).ok();

    if !(200..300).contains(&status) {
        let message = match &parsed {
            Some(value) => error_message(value).unwrap_or_default(),
            None => body,
        };
        return Err(classify_status(status, message));
    }

    let value = parsed.ok_or(FailureKind::MalformedResponse)?;
    if let Some(code) = value.pointer("/error/code").and_then(Value::as_u64) {
        let message = error_message(&value).unwrap_or_default();
        let code = u16::try_from(code).unwrap_or(0);
        return Err(classify_status(code, message));
    }
    extract_content(&value).ok_or(FailureKind::MalformedResponse)
}

fn error_message(value: &Value) -> Option<&str> {
    value.pointer("/error/message").and_then(Value::as_str)
}

fn extract_content(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    async fn complete(&self, request: &ChatRequest, cancel: &CancellationToken) -> QueryAttempt {
        let body = CompletionBody::from_request(request);
        let outcome = self
            .policy
            .run(cancel, |attempt| self.send_once(&body, attempt))
            .await;

        match &outcome {
            QueryAttempt::Success { content, elapsed, attempts } => info!(
                model = %request.model,
                structured = request.structured_output,
                attempts,
                elapsed_s = elapsed.as_secs_f64(),
                output_len = content.len(),
                "chat completion received"
            ),
            QueryAttempt::Failure { kind, attempts } => warn!(
                model = %request.model,
                structured = request.structured_output,
                attempts,
                %kind,
                "chat completion gave up"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_body(content: &str) -> String {
        serde_json::json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    #[test]
    fn success_extracts_first_choice() {
        assert_eq!(classify_response(200, &ok_body("olá")), Ok("olá".to_string()));
    }

    #[test]
    fn success_without_content_is_malformed() {
        assert_eq!(classify_response(200, r#"{"choices": []}"#), Err(FailureKind::MalformedResponse));
        assert_eq!(
            classify_response(200, r#"{"choices": [{"message": {"content": null}}]}"#),
            Err(FailureKind::MalformedResponse)
        );
        assert_eq!(classify_response(200, "<html>"), Err(FailureKind::MalformedResponse));
    }

    #[test]
    fn statuses() {
        assert_eq!(classify_response(429, ""), Err(FailureKind::RateLimited));
        assert_eq!(classify_response(402, "{}"), Err(FailureKind::InsufficientCredits));
        assert_eq!(classify_response(500, ""), Err(FailureKind::ServerError));
        assert_eq!(classify_response(503, ""), Err(FailureKind::ServerError));
        assert_eq!(classify_response(413, ""), Err(FailureKind::PayloadTooLarge));
        assert_eq!(classify_response(401, "{}"), Err(FailureKind::Other));
        assert_eq!(classify_response(404, ""), Err(FailureKind::Other));
    }

    #[test]
    fn bad_request_depends_on_message() {
        let too_long = r#"{"error": {"message": "This endpoint's maximum context length is 32768 tokens", "code": 400}}"#;
        assert_eq!(classify_response(400, too_long), Err(FailureKind::PayloadTooLarge));
        assert_eq!(classify_response(400, ""), Err(FailureKind::PayloadTooLarge));
        let invalid = r#"{"error": {"message": "invalid model id", "code": 400}}"#;
        assert_eq!(classify_response(400, invalid), Err(FailureKind::Other));
    }

    #[test]
    fn error_object_inside_ok_status() {
        let body = r#"{"error": {"message": "Rate limit exceeded", "code": 429}}"#;
        assert_eq!(classify_response(200, body), Err(FailureKind::RateLimited));
        let body = r#"{"error": {"message": "upstream down", "code": 502}}"#;
        assert_eq!(classify_response(200, body), Err(FailureKind::ServerError));
    }

    #[test]
    fn body_carries_response_format_only_when_structured() {
        let mut request = ChatRequest {
            model: "m".into(),
            system_prompt: "sys".into(),
            user_prompt: "usr".into(),
            structured_output: true,
        };
        let json = serde_json::to_value(CompletionBody::from_request(&request)).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "usr");

        request.structured_output = false;
        let json = serde_json::to_value(CompletionBody::from_request(&request)).unwrap();
        assert!(json.get("response_format").is_none());
    }
}
