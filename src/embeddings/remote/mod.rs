#[cfg(test)]
mod tests;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::Embeddings;
use crate::config::EmbeddingConfig;
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 1;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    endpoint: Url,
    model: String,
    api_key: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    /// Build a client from configuration. The API key is read from the
    /// environment variable named in `api_key_env`.
    #[inline]
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            RagError::Config(format!(
                "Remote embedding requires an API key in ${}",
                config.api_key_env
            ))
        })?;

        Ok(Self::new(&config.base_url, &config.model, api_key)?
            .with_batch_size(config.batch_size)
            .with_timeout(Duration::from_secs(config.timeout_seconds)))
    }

    #[inline]
    pub fn new(base_url: &str, model: &str, api_key: String) -> Result<Self> {
        let endpoint = Url::parse(&embeddings_endpoint(base_url))
            .map_err(|e| RagError::Config(format!("Invalid embedding URL {}: {}", base_url, e)))?;

        let defaults = EmbeddingConfig::default();
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(defaults.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: model.to_string(),
            api_key,
            batch_size: defaults.batch_size,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `texts` in batches, preserving input order
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from {} ({})",
            texts.len(),
            self.endpoint,
            self.model
        );

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(usize::try_from(self.batch_size).unwrap_or(usize::MAX)) {
            let vectors = self
                .embed_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))
                .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;
            results.extend(vectors);
        }

        if let Some(first) = results.first() {
            let width = first.len();
            if width == 0 || results.iter().any(|row| row.len() != width) {
                return Err(RagError::Embedding(
                    "Embedding service returned vectors of inconsistent width".to_string(),
                ));
            }
        }

        debug!("Received {} embeddings", results.len());
        Ok(results)
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Embeddings> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;
        let authorization = format!("Bearer {}", self.api_key);

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &authorization)
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.data.len() != texts.len() {
            return Err(anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            ));
        }

        let mut data = response.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> anyhow::Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(ureq::Error::StatusCode(status)) if status < 500 && status != 429 => {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(anyhow!("Client error: HTTP {}", status));
                }
                Err(
                    error @ (ureq::Error::StatusCode(_)
                    | ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Request failed: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow!("Request error: {}", error));
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(anyhow!("Non-retryable error: {}", error));
                }
            }

            if attempt < self.retry_attempts {
                let delay = Duration::from_millis(EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All attempts failed for request to {}", self.endpoint);
        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }
}

/// Accepts a bare host, a versioned base such as `…/v1`, or the full
/// `…/embeddings` URL
fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = base_url.trim_end_matches('/');
    if normalized.ends_with("/embeddings") {
        return normalized.to_string();
    }
    if has_version_suffix(normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}
