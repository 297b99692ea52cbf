//! # LLM client (C10)
//!
//! A chat-completion client against an OpenAI-compatible gateway. The actual
//! HTTP round trip is behind the [`LlmTransport`] trait so tests can inject a
//! canned transport instead of making network calls — the design notes are
//! explicit that the source's keyword-echo stub is a testing convenience only
//! and must not be reproduced in the core; this client is always a real HTTP
//! client, real or fake only at the transport seam.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub freq_penalty: Option<f32>,
    pub pres_penalty: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-3.5-sonnet".to_string(),
            max_tokens: 800,
            temperature: 0.7,
            top_p: None,
            freq_penalty: None,
            pres_penalty: None,
            stop: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// Failure classification for the retry loop. Only `Timeout`, `Connection`,
/// `RateLimited`, and `ServerError` are retryable.
#[derive(Debug, Error, Clone)]
pub enum LlmTransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("rate limited")]
    RateLimited,
    #[error("server error: {0}")]
    ServerError(u16),
    #[error("client error {0}: {1}")]
    ClientError(u16, String),
    #[error("response decode error: {0}")]
    Decode(String),
}

impl LlmTransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmTransportError::Timeout
                | LlmTransportError::Connection(_)
                | LlmTransportError::RateLimited
                | LlmTransportError::ServerError(_)
        )
    }
}

/// Injectable transport for the raw chat-completion HTTP call.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResult, LlmTransportError>;
}

/// Real HTTP transport against an OpenAI-compatible `/chat/completions`
/// endpoint, bearer-authenticated, with a wall-clock timeout.
pub struct HttpLlmTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "frequency_penalty")]
    freq_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "presence_penalty")]
    pres_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[async_trait]
impl LlmTransport for HttpLlmTransport {
    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResult, LlmTransportError> {
        let body = WireRequest {
            model: &options.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            freq_penalty: options.freq_penalty,
            pres_penalty: options.pres_penalty,
            stop: options.stop.as_deref(),
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmTransportError::Timeout
                } else {
                    LlmTransportError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(LlmTransportError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LlmTransportError::ServerError(status.as_u16()));
        }
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmTransportError::ClientError(status.as_u16(), text));
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| LlmTransportError::Decode(e.to_string()))?;
        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatResult {
            content,
            model: wire.model,
            usage: Usage {
                prompt_tokens: wire.usage.prompt_tokens,
                completion_tokens: wire.usage.completion_tokens,
                total_tokens: wire.usage.total_tokens,
            },
        })
    }
}

/// Monotonic usage counters, per the data model's "LLM usage counters".
#[derive(Default)]
pub struct UsageCounters {
    pub requests: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub total_tokens: AtomicU64,
    /// Estimated cost in cents (USD), fixed-point to keep the counter
    /// integral and atomic.
    pub estimated_cost_cents: AtomicU64,
}

/// Per-model pricing, in cents per 1K tokens (prompt, completion). Defaults
/// to an anthropic-class rate when the model isn't in the table.
fn price_per_1k_cents(model: &str) -> (f64, f64) {
    match model {
        "anthropic/claude-3.5-sonnet" => (0.3, 1.5),
        "anthropic/claude-3-haiku" => (0.025, 0.125),
        "anthropic/claude-3-opus" => (1.5, 7.5),
        _ => (0.3, 1.5),
    }
}

pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct LlmClient {
    transport: Box<dyn LlmTransport>,
    retry: RetryPolicy,
    counters: UsageCounters,
}

impl LlmClient {
    pub fn new(transport: Box<dyn LlmTransport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            counters: UsageCounters::default(),
        }
    }

    pub fn counters(&self) -> &UsageCounters {
        &self.counters
    }

    /// Perform a chat completion, retrying retryable failures with
    /// exponential backoff (doubling each attempt).
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResult, LlmTransportError> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut delay = self.retry.base_delay;
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match self.transport.send(messages, options).await {
                Ok(result) => {
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .total_tokens
                        .fetch_add(result.usage.total_tokens as u64, Ordering::Relaxed);
                    let (prompt_rate, completion_rate) = price_per_1k_cents(&result.model);
                    let cost_cents = (result.usage.prompt_tokens as f64 / 1000.0) * prompt_rate
                        + (result.usage.completion_tokens as f64 / 1000.0) * completion_rate;
                    self.counters
                        .estimated_cost_cents
                        .fetch_add(cost_cents.round() as u64, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    last_err = Some(e);
                    if !retryable || attempt + 1 == self.retry.max_attempts {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        Err(last_err.expect("loop always sets last_err before exiting"))
    }

    /// Summarise `text` using a lower temperature (0.3) and an explicit
    /// summary-prompt wrapper, truncated conceptually to `max_chars` worth of
    /// content via `max_tokens` derived from it.
    pub async fn summarise(&self, text: &str, max_chars: usize) -> Result<String, LlmTransportError> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: "Summarise the following conversation context concisely.".to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: text.to_string(),
            },
        ];
        let options = ChatOptions {
            temperature: 0.3,
            max_tokens: (max_chars / 4).max(32) as u32,
            ..ChatOptions::default()
        };
        self.chat(&messages, &options).await.map(|r| r.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<Vec<Result<ChatResult, LlmTransportError>>>,
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        async fn send(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatResult, LlmTransportError> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn ok_result() -> ChatResult {
        ChatResult {
            content: "hello".to_string(),
            model: "anthropic/claude-3.5-sonnet".to_string(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }
    }

    #[tokio::test]
    async fn successful_call_updates_counters() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![Ok(ok_result())]),
        };
        let client = LlmClient::new(Box::new(transport), RetryPolicy::default());
        let result = client
            .chat(&[], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(result.content, "hello");
        assert_eq!(client.counters().successes.load(Ordering::Relaxed), 1);
        assert_eq!(client.counters().total_tokens.load(Ordering::Relaxed), 15);
    }

    #[tokio::test]
    async fn retryable_failure_retries_then_succeeds() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![
                Err(LlmTransportError::Timeout),
                Ok(ok_result()),
            ]),
        };
        let client = LlmClient::new(
            Box::new(transport),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        let result = client.chat(&[], &ChatOptions::default()).await.unwrap();
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_immediately() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![Err(LlmTransportError::ClientError(
                400,
                "bad request".to_string(),
            ))]),
        };
        let client = LlmClient::new(Box::new(transport), RetryPolicy::default());
        let err = client.chat(&[], &ChatOptions::default()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(client.counters().failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_count_as_failure() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![
                Err(LlmTransportError::Timeout),
                Err(LlmTransportError::Timeout),
            ]),
        };
        let client = LlmClient::new(
            Box::new(transport),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        );
        let err = client.chat(&[], &ChatOptions::default()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.counters().failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn http_transport_sends_bearer_auth_and_parses_response() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/chat/completions")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(serde_json::json!({
                "id": "resp1",
                "model": "anthropic/claude-3.5-sonnet",
                "choices": [{"message": {"role": "assistant", "content": "hi there"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
            }));
        });

        let transport = HttpLlmTransport::new(server.base_url(), "sk-test", Duration::from_secs(5));
        let messages = vec![ChatMessage {
            role: Role::User,
            content: "hello".to_string(),
        }];
        let result = transport.send(&messages, &ChatOptions::default()).await.unwrap();

        mock.assert();
        assert_eq!(result.content, "hi there");
        assert_eq!(result.usage.total_tokens, 6);
    }

    #[tokio::test]
    async fn http_transport_classifies_rate_limit_as_retryable() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/chat/completions");
            then.status(429);
        });

        let transport = HttpLlmTransport::new(server.base_url(), "sk-test", Duration::from_secs(5));
        let err = transport
            .send(&[], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmTransportError::RateLimited));
        assert!(err.is_retryable());
    }
}
