//! Speech-to-text providers.

use std::path::Path;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use scribe_shared::config::SttProviderConfig;
use scribe_shared::errors::{ProviderError, ScribeError, ScribeResult};
use scribe_shared::messaging::TaskOptions;

use super::reject_error_status;

/// STT capability: `transcribe(token, path, options) → text`.
#[derive(Debug, Clone)]
pub enum SttProvider {
    Mock(MockStt),
    Http(HttpStt),
}

impl SttProvider {
    /// Select the provider variant from configuration.
    pub fn from_config(config: &SttProviderConfig) -> ScribeResult<Self> {
        match config.provider.as_str() {
            "mock" => Ok(Self::Mock(MockStt::new(&config.mock_transcript))),
            "http" => Ok(Self::Http(HttpStt::from_config(config)?)),
            other => Err(ScribeError::Config(format!(
                "unknown stt provider '{other}' (expected 'mock' or 'http')"
            ))),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
            Self::Http(_) => "http",
        }
    }

    /// Transcribe one normalized audio chunk.
    pub async fn transcribe(
        &self,
        token: &CancellationToken,
        path: &Path,
        options: &TaskOptions,
    ) -> Result<String, ProviderError> {
        match self {
            Self::Mock(provider) => provider.transcribe(token, path).await,
            Self::Http(provider) => provider.transcribe(token, path, options).await,
        }
    }
}

/// Returns a fixed transcript; used in tests and local development.
#[derive(Debug, Clone)]
pub struct MockStt {
    transcript: String,
}

impl MockStt {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }

    async fn transcribe(
        &self,
        token: &CancellationToken,
        _path: &Path,
    ) -> Result<String, ProviderError> {
        if token.is_cancelled() {
            return Err(ProviderError::Transient("transcription cancelled".into()));
        }
        Ok(self.transcript.clone())
    }
}

/// Whisper-style HTTP transcription endpoint.
#[derive(Debug, Clone)]
pub struct HttpStt {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpStt {
    pub fn from_config(config: &SttProviderConfig) -> ScribeResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            ScribeError::Config("stt.base_url is required for the http provider".into())
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn transcribe(
        &self,
        token: &CancellationToken,
        path: &Path,
        options: &TaskOptions,
    ) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|error| ProviderError::Transient(format!("reading chunk failed: {error}")))?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chunk.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|error| ProviderError::Permanent(error.to_string()))?;

        let model = options.stt_model.clone().unwrap_or_else(|| self.model.clone());
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model);
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::select! {
            _ = token.cancelled() => {
                return Err(ProviderError::Transient("transcription cancelled".into()));
            }
            result = request.send() => {
                result.map_err(|error| ProviderError::Transient(error.to_string()))?
            }
        };

        let response = reject_error_status(response).await?;
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Transient(format!("decoding response: {error}")))?;

        Ok(body.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_configured_transcript() {
        let provider = SttProvider::Mock(MockStt::new("hello world"));
        let token = CancellationToken::new();

        let text = provider
            .transcribe(&token, Path::new("/tmp/chunk-0000.wav"), &TaskOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(provider.provider_name(), "mock");
    }

    #[tokio::test]
    async fn mock_observes_cancellation() {
        let provider = MockStt::new("unused");
        let token = CancellationToken::new();
        token.cancel();

        let err = provider
            .transcribe(&token, Path::new("/tmp/chunk.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }

    #[test]
    fn http_provider_requires_base_url() {
        let config = SttProviderConfig {
            provider: "http".into(),
            ..Default::default()
        };
        assert!(SttProvider::from_config(&config).is_err());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = SttProviderConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        let err = SttProvider::from_config(&config).unwrap_err();
        assert!(matches!(err, ScribeError::Config(_)));
    }
}
