//! Best-effort caption translation.
//!
//! A failed translation never fails the request: the caller gets its input
//! back unchanged and the failure only shows up in the logs.

use std::time::Duration;

use serde_json::Value;

use crate::error::TranslateError;
use crate::types::Language;

fn translation_repo(from: Language, to: Language) -> Option<&'static str> {
    match (from, to) {
        (Language::En, Language::Zh) => Some("Helsinki-NLP/opus-mt-en-zh"),
        (Language::Zh, Language::En) => Some("Helsinki-NLP/opus-mt-zh-en"),
        _ => None,
    }
}

pub struct Translator {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl Translator {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
            timeout,
        }
    }

    /// Translate `text`, or return it untouched if anything goes wrong.
    pub async fn translate(&self, text: &str, from: Language, to: Language) -> String {
        let Some(repo) = translation_repo(from, to) else {
            return text.to_string();
        };
        if text.trim().is_empty() {
            return text.to_string();
        }

        match self.request(text, repo).await {
            Ok(translated) => {
                tracing::info!(from = from.code(), to = to.code(), "Translated caption");
                translated
            }
            Err(err) => {
                tracing::warn!(
                    from = from.code(),
                    to = to.code(),
                    error = %err,
                    "Translation failed, keeping original caption"
                );
                text.to_string()
            }
        }
    }

    async fn request(&self, text: &str, repo: &str) -> Result<String, TranslateError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), repo);
        let mut request = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "inputs": text }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::Status(status.as_u16()));
        }
        let body: Value = response.json().await?;
        extract_translation(&body).ok_or(TranslateError::MissingText)
    }
}

/// Accepts `[{"translation_text": ...}]` as well as a bare object.
fn extract_translation(body: &Value) -> Option<String> {
    let item = body.as_array().and_then(|items| items.first()).unwrap_or(body);
    let text = item.get("translation_text")?.as_str()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    use super::*;
    use crate::test_support::spawn_server;

    fn translator(base: &str) -> Translator {
        Translator::new(reqwest::Client::new(), base, None, Duration::from_secs(5))
    }

    #[test]
    fn extracts_both_shapes() {
        assert_eq!(
            extract_translation(&json!([{"translation_text": "一只猫"}])).as_deref(),
            Some("一只猫")
        );
        assert_eq!(
            extract_translation(&json!({"translation_text": "a cat"})).as_deref(),
            Some("a cat")
        );
        assert_eq!(extract_translation(&json!([{"translation_text": " "}])), None);
        assert_eq!(extract_translation(&json!({"error": "loading"})), None);
    }

    #[tokio::test]
    async fn translates_english_to_chinese() {
        let router = Router::new().route(
            "/Helsinki-NLP/opus-mt-en-zh",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["inputs"], "a cat");
                Json(json!([{"translation_text": "一只猫"}]))
            }),
        );
        let base = spawn_server(router).await;

        let out = translator(&base)
            .translate("a cat", Language::En, Language::Zh)
            .await;
        assert_eq!(out, "一只猫");
    }

    #[tokio::test]
    async fn translates_chinese_to_english() {
        let router = Router::new().route(
            "/Helsinki-NLP/opus-mt-zh-en",
            post(|| async { Json(json!([{"translation_text": "a cat"}])) }),
        );
        let base = spawn_server(router).await;

        let out = translator(&base)
            .translate("一只猫", Language::Zh, Language::En)
            .await;
        assert_eq!(out, "a cat");
    }

    #[tokio::test]
    async fn failure_returns_input_unchanged() {
        let router = Router::new()
            .route(
                "/Helsinki-NLP/opus-mt-en-zh",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let base = spawn_server(router).await;
        let input = "  a cat, sitting  ";

        let out = translator(&base)
            .translate(input, Language::En, Language::Zh)
            .await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn unreachable_endpoint_returns_input_unchanged() {
        // Nothing listens on the discard port.
        let out = translator("http://127.0.0.1:9")
            .translate("a cat", Language::En, Language::Zh)
            .await;
        assert_eq!(out, "a cat");
    }

    #[tokio::test]
    async fn same_language_skips_the_call() {
        let out = translator("http://127.0.0.1:9")
            .translate("a cat", Language::En, Language::En)
            .await;
        assert_eq!(out, "a cat");
    }
}
