//! Blocking client for OpenAI-compatible embedding servers.

use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use coursegraph_shared::{CourseGraphError, Result};

use crate::EmbeddingProvider;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: usize = 3;

/// Embeds texts by POSTing batches to `<base>/embeddings`.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
    max_retries: usize,
}

impl HttpEmbedder {
    /// Build a client for `base_url`. The API key is optional (local servers).
    pub fn new(
        base_url: Url,
        api_key: Option<String>,
        model: String,
        dimensions: Option<usize>,
        batch_size: usize,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(CourseGraphError::config("missing embedding model name"));
        }
        if batch_size == 0 {
            return Err(CourseGraphError::config("embedding batch size must be positive"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let auth = HeaderValue::from_str(&format!("Bearer {}", key.trim()))
                .map_err(|e| CourseGraphError::config(format!("invalid API key: {e}")))?;
            headers.insert(AUTHORIZATION, auth);
        }

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| CourseGraphError::Embedding(format!("client build: {e}")))?;

        let endpoint = format!("{}/embeddings", base_url.as_str().trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            batch_size,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Override how many retries follow a failed first attempt. Zero disables retrying.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };

            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse = resp.json().map_err(|e| {
                        CourseGraphError::Embedding(format!("invalid response body: {e}"))
                    })?;
                    parsed.data.sort_by_key(|entry| entry.index);
                    if parsed.data.len() != inputs.len() {
                        return Err(CourseGraphError::Embedding(format!(
                            "server returned {} embeddings for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        )));
                    }
                    return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "embedding request failed, retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(CourseGraphError::Embedding(format!(
                        "request failed ({status}): {body}"
                    )));
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries {
                        attempt += 1;
                        warn!(error = %e, attempt, "embedding request error, retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(CourseGraphError::Embedding(format!("{}: {e}", self.endpoint)));
                }
            }
        }
    }
}

impl EmbeddingProvider for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(self.batch_size).enumerate() {
            let inputs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            debug!(batch = i, size = inputs.len(), "embedding batch");
            out.extend(self.embed_batch(&inputs)?);
        }
        Ok(out)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
