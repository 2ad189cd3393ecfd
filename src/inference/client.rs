use super::models::{ModelFamily, Reasoning};
use crate::config::InferenceConfig;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl ChatRequest {
    /// Single user-turn request, shaped for the model's family.
    pub fn new(model: &str, prompt: &str, max_tokens: u32, reasoning: bool) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            reasoning: ModelFamily::of(model).reasoning(reasoning),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// One chat-completion round trip.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Content of the first choice's message, if the response carried one.
    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<Option<String>>;
}

/// OpenRouter chat-completions endpoint.
pub struct OpenRouterTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl OpenRouterTransport {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl ChatTransport for OpenRouterTransport {
    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Title", "re2-prep")
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("API error {}: {}", status, redact_error_body(&text, &self.api_key));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse OpenRouter response: {}: {}",
                e,
                redact_error_body(&text, &self.api_key)
            )
        })?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content))
    }
}

/// Error-body excerpt safe to log: one line, bounded, and withheld entirely
/// when it echoes the key or looks like it carries credentials.
fn redact_error_body(body: &str, api_key: &str) -> String {
    const SECRET_MARKERS: &[&str] = &["api_key", "apikey", "bearer", "secret", "sk-or-"];

    let flattened = body.split_whitespace().collect::<Vec<_>>().join(" ");
    let excerpt = truncate_str(&flattened, MAX_ERROR_CONTENT_LEN);
    let lower = excerpt.to_lowercase();
    let leaks_key = !api_key.is_empty() && flattened.contains(api_key);
    if leaks_key || SECRET_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return "(body withheld: may contain credentials)".to_string();
    }
    excerpt.to_string()
}

/// Truncate a string for display (Unicode-safe)
fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Attempt budget and exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&InferenceConfig::default())
    }
}

impl From<&InferenceConfig> for RetryPolicy {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no usable response after {attempts} attempt(s); last error: {}", .last_error.as_deref().unwrap_or("none"))]
pub struct RetriesExhausted {
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Retry-wrapped chat client.
pub struct InferenceClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: ChatTransport> InferenceClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a prompt, retrying until a response has non-blank content or the
    /// attempt budget runs out. Transport errors count as failed attempts.
    pub async fn send(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        reasoning: bool,
    ) -> Result<String, RetriesExhausted> {
        let request = ChatRequest::new(model, prompt, max_tokens, reasoning);
        self.send_request(&request).await
    }

    pub async fn send_request(&self, request: &ChatRequest) -> Result<String, RetriesExhausted> {
        let mut last_error = None;

        for attempt in 1..=self.policy.max_retries {
            if attempt > 1 {
                let delay = self.policy.backoff(attempt - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            match self.transport.complete(request).await {
                Ok(Some(content)) if !content.trim().is_empty() => return Ok(content),
                Ok(_) => {
                    tracing::warn!(model = %request.model, attempt, "Empty response; retrying");
                    last_error = Some("empty response".to_string());
                }
                Err(err) => {
                    tracing::warn!(model = %request.model, attempt, error = %err, "Request failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        tracing::error!(
            model = %request.model,
            attempts = self.policy.max_retries,
            last_error = last_error.as_deref().unwrap_or("none"),
            "Failed after max retries"
        );
        Err(RetriesExhausted {
            attempts: self.policy.max_retries,
            last_error,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays scripted outcomes; once the script runs out every call fails.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Option<String>, String>>>,
        pub calls: AtomicU32,
        pub last_request: Mutex<Option<ChatRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<Option<String>, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(&self, request: &ChatRequest) -> anyhow::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(content)) => Ok(content),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("connection refused")),
            }
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_fifth_attempt() {
        let script = vec![
            Err("timeout".to_string()),
            Err("502".to_string()),
            Err("reset".to_string()),
            Err("timeout".to_string()),
            Ok(Some("[ANSWER]done[/ANSWER]".to_string())),
        ];
        let client = InferenceClient::new(ScriptedTransport::new(script), RetryPolicy::immediate(5));
        let reply = client.send("openai/gpt-5", "prompt", 4096, false).await;
        assert_eq!(reply.unwrap(), "[ANSWER]done[/ANSWER]");
        assert_eq!(client.transport.calls(), 5);
    }

    #[tokio::test]
    async fn test_always_failing_transport_exhausts_budget() {
        let client = InferenceClient::new(ScriptedTransport::default(), RetryPolicy::immediate(5));
        let err = client.send("m", "p", 16, false).await.unwrap_err();
        assert_eq!(err.attempts, 5);
        assert_eq!(err.last_error.as_deref(), Some("connection refused"));
        assert_eq!(client.transport.calls(), 5);
    }

    #[tokio::test]
    async fn test_blank_content_is_retried() {
        let script = vec![Ok(None), Ok(Some("  \n".to_string())), Ok(Some("ok".to_string()))];
        let client = InferenceClient::new(ScriptedTransport::new(script), RetryPolicy::immediate(3));
        assert_eq!(client.send("m", "p", 16, false).await.unwrap(), "ok");
        assert_eq!(client.transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_request_is_shaped_for_model() {
        let transport = ScriptedTransport::new(vec![Ok(Some("x".to_string()))]);
        let client = InferenceClient::new(transport, RetryPolicy::immediate(1));
        client.send("anthropic/claude-sonnet-4.5", "hi", 512, false).await.unwrap();

        let request = client.transport.last_request.lock().unwrap().clone().unwrap();
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "anthropic/claude-sonnet-4.5",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 512,
                "reasoning": {"enabled": false}
            })
        );
    }

    #[test]
    fn test_plain_request_omits_reasoning() {
        let body = serde_json::to_value(ChatRequest::new("openai/gpt-4o", "hi", 8, false)).unwrap();
        assert!(body.get("reasoning").is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_error_body_is_flattened_and_redacted() {
        assert_eq!(redact_error_body("bad\n  request", "k"), "bad request");
        assert!(redact_error_body("invalid api_key", "k").contains("withheld"));
        assert!(redact_error_body("token was abc123", "abc123").contains("withheld"));
        assert_eq!(truncate_str("héllo", 2), "hé");
    }
}
