//! HTTP client for LLM extraction calls
//!
//! The transport is a trait so the extractor can be exercised with scripted
//! clients in tests; the HTTP implementation speaks the same three provider
//! dialects as the rest of the ecosystem (Ollama, Claude, OpenAI-compatible).

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;

/// One model completion, with token usage when the provider reports it.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Raw completion text (JSON extraction happens in the extractor)
    pub text: String,
    /// Prompt tokens consumed, if reported
    pub tokens_in: Option<i64>,
    /// Completion tokens produced, if reported
    pub tokens_out: Option<i64>,
}

/// LLM completion interface for extraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion>;
}

/// HTTP-backed client for the configured provider.
pub struct HttpLlmClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = match config.provider {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => config
                .api_key
                .clone()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok()),
            LlmProvider::OpenAI => config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
        };

        if matches!(config.provider, LlmProvider::Claude | LlmProvider::OpenAI) && api_key.is_none()
        {
            return Err(Error::Config(
                "llm.api_key (or provider env var) is required".to_string(),
            ));
        }

        let timeout_secs = config.timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint,
            api_key,
            http,
        })
    }

    async fn complete_ollama(&self, prompt: &str) -> Result<Completion> {
        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
            }))
            .send()
            .await
            .map_err(|e| Error::Llm(format!("ollama request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("ollama read body failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "ollama returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        let envelope: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| Error::Llm(format!("ollama sent unparseable body: {e}")))?;
        let text = envelope
            .get("response")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| Error::Llm("ollama response missing string field `response`".to_string()))?;
        Ok(Completion {
            text,
            tokens_in: envelope.get("prompt_eval_count").and_then(|v| v.as_i64()),
            tokens_out: envelope.get("eval_count").and_then(|v| v.as_i64()),
        })
    }

    async fn complete_claude(&self, prompt: &str) -> Result<Completion> {
        let url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.as_deref().unwrap_or_default())
                .map_err(|e| Error::Llm(format!("invalid claude api key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&json!({
                "model": self.model,
                "max_tokens": 4096,
                "temperature": 0,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| Error::Llm(format!("claude request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("claude read body failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "claude returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        let envelope: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| Error::Llm(format!("claude sent unparseable body: {e}")))?;
        let text = envelope
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("text"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| Error::Llm("claude response missing content[0].text".to_string()))?;
        let usage = envelope.get("usage");
        Ok(Completion {
            text,
            tokens_in: usage
                .and_then(|u| u.get("input_tokens"))
                .and_then(|v| v.as_i64()),
            tokens_out: usage
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_i64()),
        })
    }

    async fn complete_openai(&self, prompt: &str) -> Result<Completion> {
        let url = format!(
            "{}/v1/chat/completions",
            self.endpoint.trim_end_matches('/')
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "Bearer {}",
                self.api_key.as_deref().unwrap_or_default()
            ))
            .map_err(|e| Error::Llm(format!("invalid auth header: {e}")))?,
        );

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&json!({
                "model": self.model,
                "temperature": 0,
                "response_format": { "type": "json_object" },
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| Error::Llm(format!("openai request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("openai read body failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "openai returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        let envelope: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| Error::Llm(format!("openai sent unparseable body: {e}")))?;
        let text = envelope
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::Llm("openai response missing choices[0].message.content".to_string())
            })?;
        let usage = envelope.get("usage");
        Ok(Completion {
            text,
            tokens_in: usage
                .and_then(|u| u.get("prompt_tokens"))
                .and_then(|v| v.as_i64()),
            tokens_out: usage
                .and_then(|u| u.get("completion_tokens"))
                .and_then(|v| v.as_i64()),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<Completion> {
        match self.provider {
            LlmProvider::Ollama => self.complete_ollama(prompt).await,
            LlmProvider::Claude => self.complete_claude(prompt).await,
            LlmProvider::OpenAI => self.complete_openai(prompt).await,
        }
    }
}

/// Check whether an LLM error is transient and worth retrying.
///
/// Transport failures, timeouts, unreadable provider envelopes, and
/// HTTP 408/429/5xx are transient; other statuses are not.
pub(crate) fn is_retryable(error: &Error) -> bool {
    let Error::Llm(msg) = error else { return false };

    if msg.contains("request failed")
        || msg.contains("read body failed")
        || msg.contains("unparseable body")
        || msg.contains("missing")
    {
        return true;
    }

    if let Some(rest) = msg.split(" returned ").nth(1) {
        if let Some(code) = rest.get(..3).and_then(|s| s.parse::<u16>().ok()) {
            return code == 408 || code == 429 || code >= 500;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_api_key_for_hosted_providers() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
        };
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert!(HttpLlmClient::new(&config).is_err());
        }
    }

    #[test]
    fn test_client_with_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: LlmProvider::Ollama,
            model: "llama3.2".to_string(),
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
        };
        assert!(HttpLlmClient::new(&config).is_ok());
    }

    #[test]
    fn test_is_retryable_classification() {
        assert!(is_retryable(&Error::Llm(
            "claude request failed: connection reset".to_string()
        )));
        assert!(is_retryable(&Error::Llm(
            "openai returned 500: internal error".to_string()
        )));
        assert!(is_retryable(&Error::Llm(
            "openai returned 429: slow down".to_string()
        )));
        assert!(is_retryable(&Error::Llm(
            "ollama sent unparseable body: EOF".to_string()
        )));
        assert!(is_retryable(&Error::Llm(
            "claude response missing content[0].text".to_string()
        )));

        assert!(!is_retryable(&Error::Llm(
            "openai returned 400: bad request".to_string()
        )));
        assert!(!is_retryable(&Error::Llm(
            "claude returned 401: unauthorized".to_string()
        )));
        assert!(!is_retryable(&Error::SchemaViolation {
            fingerprint: "abc".to_string(),
            message: "exchanges must be a list".to_string(),
        }));
    }
}
