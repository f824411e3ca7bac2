//! Summarization providers.
//!
//! The streaming contract: `on_chunk` observes every delta in order, and
//! `summarize_stream` returns the full accumulated text only after the
//! upstream stream terminates (normally or by error).

use futures::StreamExt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use scribe_shared::config::LlmProviderConfig;
use scribe_shared::errors::{ProviderError, ScribeError, ScribeResult};

use super::reject_error_status;

const DEFAULT_SUMMARY_PROMPT: &str =
    "Summarize the following transcript concisely, keeping the key points.";

/// LLM capability: `summarize_stream(token, transcript, prompt, on_chunk)`.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Mock(MockLlm),
    Http(HttpLlm),
}

impl LlmProvider {
    /// Select the provider variant from configuration.
    pub fn from_config(config: &LlmProviderConfig) -> ScribeResult<Self> {
        match config.provider.as_str() {
            "mock" => Ok(Self::Mock(MockLlm::new(&config.mock_summary))),
            "http" => Ok(Self::Http(HttpLlm::from_config(config)?)),
            other => Err(ScribeError::Config(format!(
                "unknown llm provider '{other}' (expected 'mock' or 'http')"
            ))),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
            Self::Http(_) => "http",
        }
    }

    /// Stream a summary of `transcript`, invoking `on_chunk` per delta.
    pub async fn summarize_stream<F, Fut>(
        &self,
        token: &CancellationToken,
        transcript: &str,
        prompt: Option<&str>,
        on_chunk: F,
    ) -> Result<String, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        match self {
            Self::Mock(provider) => provider.summarize_stream(token, on_chunk).await,
            Self::Http(provider) => {
                provider
                    .summarize_stream(token, transcript, prompt, on_chunk)
                    .await
            }
        }
    }
}

/// Streams a fixed summary split on word boundaries.
#[derive(Debug, Clone)]
pub struct MockLlm {
    summary: String,
}

impl MockLlm {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }

    async fn summarize_stream<F, Fut>(
        &self,
        token: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<String, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut full = String::new();
        for piece in self.summary.split_inclusive(' ') {
            if token.is_cancelled() {
                return Err(ProviderError::Transient("summarization cancelled".into()));
            }
            full.push_str(piece);
            on_chunk(piece.to_string()).await;
        }
        Ok(full)
    }
}

/// OpenAI-style streaming chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlm {
    pub fn from_config(config: &LlmProviderConfig) -> ScribeResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            ScribeError::Config("llm.base_url is required for the http provider".into())
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn summarize_stream<F, Fut>(
        &self,
        token: &CancellationToken,
        transcript: &str,
        prompt: Option<&str>,
        mut on_chunk: F,
    ) -> Result<String, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": prompt.unwrap_or(DEFAULT_SUMMARY_PROMPT)},
                {"role": "user", "content": transcript},
            ],
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::select! {
            _ = token.cancelled() => {
                return Err(ProviderError::Transient("summarization cancelled".into()));
            }
            result = request.send() => {
                result.map_err(|error| ProviderError::Transient(error.to_string()))?
            }
        };
        let response = reject_error_status(response).await?;

        let mut body_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut full = String::new();

        loop {
            let bytes = tokio::select! {
                _ = token.cancelled() => {
                    return Err(ProviderError::Transient("summarization cancelled".into()));
                }
                item = body_stream.next() => match item {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(error)) => {
                        return Err(ProviderError::Transient(format!("stream read: {error}")));
                    }
                    None => break,
                }
            };

            buffer.extend_from_slice(&bytes);
            for frame in drain_frames(&mut buffer) {
                for data in sse_data_lines(&frame) {
                    if data == "[DONE]" {
                        return Ok(full);
                    }
                    if let Some(delta) = delta_from_sse_data(data) {
                        full.push_str(&delta);
                        on_chunk(delta).await;
                    }
                }
            }
        }

        Ok(full)
    }
}

/// Split complete `\n\n`-terminated SSE frames off the front of the buffer.
fn drain_frames(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|window| window == b"\n\n") {
        let frame: Vec<u8> = buffer.drain(..pos + 2).collect();
        frames.push(String::from_utf8_lossy(&frame[..pos]).into_owned());
    }
    frames
}

/// Extract the payloads of `data:` lines from one SSE frame.
fn sse_data_lines(frame: &str) -> Vec<&str> {
    frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect()
}

/// Pull the content delta out of a streaming chat-completion event.
fn delta_from_sse_data(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn mock_streams_chunks_in_order_and_returns_full_text() {
        let provider = LlmProvider::Mock(MockLlm::new("Hello world"));
        let token = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let full = provider
            .summarize_stream(&token, "transcript", None, |chunk| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(chunk);
                }
            })
            .await
            .unwrap();

        assert_eq!(full, "Hello world");
        assert_eq!(*seen.lock().unwrap(), vec!["Hello ", "world"]);
    }

    #[tokio::test]
    async fn mock_aborts_on_cancellation() {
        let provider = MockLlm::new("unused");
        let token = CancellationToken::new();
        token.cancel();

        let err = provider
            .summarize_stream(&token, |_chunk| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }

    #[test]
    fn frames_split_on_double_newline() {
        let mut buffer = b"data: one\n\ndata: two\n\ndata: thr".to_vec();
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames, vec!["data: one", "data: two"]);
        // The incomplete frame stays buffered.
        assert_eq!(buffer, b"data: thr");
    }

    #[test]
    fn data_lines_ignore_comments_and_other_fields() {
        let frame = ": keepalive\nevent: message\ndata: {\"x\":1}";
        assert_eq!(sse_data_lines(frame), vec![r#"{"x":1}"#]);
    }

    #[test]
    fn delta_extraction() {
        let data = r#"{"choices":[{"delta":{"content":"Sum"},"index":0}]}"#;
        assert_eq!(delta_from_sse_data(data).as_deref(), Some("Sum"));

        // Role-only frames carry no content.
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#;
        assert_eq!(delta_from_sse_data(role_only), None);

        assert_eq!(delta_from_sse_data("not json"), None);
    }

    #[test]
    fn http_provider_requires_base_url() {
        let config = LlmProviderConfig {
            provider: "http".into(),
            ..Default::default()
        };
        assert!(LlmProvider::from_config(&config).is_err());
    }
}
