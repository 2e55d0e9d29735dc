//! Core `TextTransformer` trait and `HttpTransformer` implementation.
//!
//! `HttpTransformer` calls the hosted rewrite / translate / summarize
//! endpoints. Each endpoint takes `{"text": …}` and answers with a streamed
//! sequence of plain-text fragments; concatenating the fragments in delivery
//! order yields the full transformed text. All connection details come from
//! [`TransformConfig`]; nothing is hardcoded.

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;

use crate::config::TransformConfig;

// ---------------------------------------------------------------------------
// TransformKind
// ---------------------------------------------------------------------------

/// Which AI transform to apply to the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Clean up transcription errors and improve clarity.
    Rewrite,
    /// Translate the draft (target language decided server-side).
    Translate,
    /// Condense the draft into a structured summary.
    Summarize,
}

impl TransformKind {
    /// Endpoint name appended to the configured base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            TransformKind::Rewrite => "rewrite",
            TransformKind::Translate => "translate",
            TransformKind::Summarize => "summarize",
        }
    }
}

// ---------------------------------------------------------------------------
// TransformError
// ---------------------------------------------------------------------------

/// Errors that can occur during an AI text transform.
#[derive(Debug, Error)]
pub enum TransformError {
    /// HTTP transport or connection error.
    #[error("transform request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status. There is no
    /// structured error payload beyond the status itself.
    #[error("transform endpoint returned status {0}")]
    Status(u16),

    /// The request (including the streamed body) did not complete within the
    /// configured timeout.
    #[error("transform request timed out")]
    Timeout,

    /// The stream completed but carried no usable text. Surfaced as an
    /// error so a transform can never blank the user's draft.
    #[error("transform endpoint returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for TransformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransformError::Timeout
        } else {
            TransformError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// TextTransformer trait
// ---------------------------------------------------------------------------

/// Async trait for AI-assisted draft transforms.
///
/// Implementors must be `Send + Sync` so they can be shared across threads
/// (e.g. wrapped in `Arc<dyn TextTransformer>`).
#[async_trait]
pub trait TextTransformer: Send + Sync {
    /// Transform `text` and return the full replacement text.
    async fn transform(&self, kind: TransformKind, text: &str) -> Result<String, TransformError>;
}

// ---------------------------------------------------------------------------
// HttpTransformer
// ---------------------------------------------------------------------------

/// Calls the configured transform endpoints over HTTP.
///
/// The response body is consumed as a byte stream and decoded once the
/// stream closes — fragment boundaries are arbitrary and may split
/// multi-byte sequences, so decoding per-chunk would corrupt the text.
pub struct HttpTransformer {
    client: reqwest::Client,
    config: TransformConfig,
}

impl HttpTransformer {
    /// Build an `HttpTransformer` from application config.
    ///
    /// The HTTP client is pre-configured with the per-request timeout from
    /// `config.timeout_secs`. A default (no-timeout) client is used as a
    /// last-resort fallback if the builder fails (should never happen in
    /// practice).
    pub fn from_config(config: &TransformConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl TextTransformer for HttpTransformer {
    /// Send `text` to the endpoint for `kind` and collect the streamed
    /// replacement.
    ///
    /// The `Authorization: Bearer …` header is attached **only** when
    /// `config.api_key` is `Some(key)` and `key` is non-empty.
    async fn transform(&self, kind: TransformKind, text: &str) -> Result<String, TransformError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            kind.endpoint()
        );
        let body = serde_json::json!({ "text": text });

        let mut req = self.client.post(&url).json(&body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("transform: {} returned status {status}", kind.endpoint());
            return Err(TransformError::Status(status.as_u16()));
        }

        let mut raw: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            raw.extend_from_slice(&chunk?);
        }

        let full = String::from_utf8_lossy(&raw).trim().to_string();
        if full.is_empty() {
            return Err(TransformError::EmptyResponse);
        }

        log::debug!(
            "transform: {} returned {} chars",
            kind.endpoint(),
            full.len()
        );
        Ok(full)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
