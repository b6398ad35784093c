//! Outbound calls to captioning inference endpoints.
//!
//! One call = one [`with_retry`] loop. Each attempt is classified here:
//! 2xx with JSON is done, 429/502/503/504, timeouts and connection failures
//! are transient, anything else is permanent.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::config::RequestEncoding;
use crate::error::UpstreamError;
use crate::normalize::CAPTION_FIELDS;
use crate::retry::{with_retry, Attempt, RetryPolicy};

const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Longest slice of an upstream body kept in error messages.
const BODY_SNIPPET_CHARS: usize = 500;

enum Payload {
    Json(Value),
    Raw(Bytes),
}

pub struct InferenceGateway {
    client: reqwest::Client,
    token: Option<String>,
    policy: RetryPolicy,
}

impl InferenceGateway {
    pub fn new(client: reqwest::Client, token: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            token,
            policy,
        }
    }

    /// Send an image to a captioning endpoint and return its parsed JSON
    /// body, whatever shape it has.
    pub async fn caption(
        &self,
        url: &str,
        encoding: RequestEncoding,
        image: Bytes,
    ) -> Result<Value, UpstreamError> {
        let payload = match encoding {
            RequestEncoding::Base64Json => Payload::Json(serde_json::json!({
                "inputs": general_purpose::STANDARD.encode(&image),
            })),
            RequestEncoding::RawBytes => Payload::Raw(image),
        };

        with_retry(&self.policy, url, |_| self.attempt(url, &payload)).await
    }

    async fn attempt(&self, url: &str, payload: &Payload) -> Attempt<Value> {
        let mut request = self.client.post(url).timeout(self.policy.attempt_timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request = match payload {
            Payload::Json(value) => request.json(value),
            Payload::Raw(bytes) => request
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return classify_transport_error(err),
        };
        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => classify_response(status, &body),
            Err(err) => classify_transport_error(err),
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> Attempt<Value> {
    if err.is_timeout() {
        Attempt::Retry(UpstreamError::Timeout)
    } else {
        Attempt::Retry(UpstreamError::Transport(err.to_string()))
    }
}

/// Decide what one upstream response means for the retry loop.
pub fn classify_response(status: u16, body: &[u8]) -> Attempt<Value> {
    if (200..300).contains(&status) {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => return Attempt::Retry(UpstreamError::MalformedBody(snippet(body))),
        };
        return match error_envelope(&value) {
            Some(message) if is_loading_message(message) => {
                Attempt::Retry(UpstreamError::Reported(message.to_string()))
            }
            Some(message) => Attempt::Fail(UpstreamError::Reported(message.to_string())),
            None => Attempt::Done(value),
        };
    }

    let err = UpstreamError::Status {
        status,
        message: snippet(body),
    };
    if RETRYABLE_STATUSES.contains(&status) {
        Attempt::Retry(err)
    } else {
        Attempt::Fail(err)
    }
}

/// `{"error": "..."}` bodies that carry no caption.
fn error_envelope(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if CAPTION_FIELDS.iter().any(|field| map.contains_key(*field)) {
        return None;
    }
    map.get("error")?.as_str()
}

fn is_loading_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("loading") || lower.contains("starting")
}

fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_SNIPPET_CHARS)
        .collect()
}
