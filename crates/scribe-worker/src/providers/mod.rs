//! # STT and LLM Providers
//!
//! Pluggable capability sets behind enum dispatch: one mock and one remote
//! HTTP variant each, selected at startup from configuration. Enum dispatch
//! keeps the hot path free of trait objects while tests exercise the mocks.

pub mod llm;
pub mod stt;

pub use llm::{HttpLlm, LlmProvider, MockLlm};
pub use stt::{HttpStt, MockStt, SttProvider};

use scribe_shared::errors::ProviderError;

/// Map an HTTP response status to the provider error classes: client errors
/// are permanent (bad input), everything else is transient.
pub(crate) async fn reject_error_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{status}: {}", body.trim());
    if status.is_client_error() {
        Err(ProviderError::Permanent(detail))
    } else {
        Err(ProviderError::Transient(detail))
    }
}
