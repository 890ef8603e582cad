//! Ollama HTTP client and the model capability traits.
//!
//! The pipeline talks to models only through [`GenerationModel`] and
//! [`EmbeddingModel`], so the orchestrator and the sensitive-data handler
//! can be exercised with stub implementations in tests. The concrete
//! implementations call a local Ollama server (`/api/generate` and
//! `/api/embeddings`, both non-streaming).
//!
//! # Retry Strategy
//!
//! Transport retries use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The request timeout comes from `ollama.timeout_secs`; no timeout is
//! applied when it is unset.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OllamaConfig;

/// A text-generation model: one prompt in, one completed response out.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn invoke(&self, system: Option<&str>, prompt: &str) -> Result<String>;
}

/// A text-embedding model mapping text to a fixed-size vector.
///
/// Used identically at ingestion and query time so chunk and query vectors
/// live in the same space.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier stored alongside each embedding for audit.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// Generation client bound to one Ollama model.
///
/// Two instances are normally alive at once: the response model and the
/// anonymization model, each with its own temperature and context window.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_ctx: u32,
    max_retries: u32,
}

impl OllamaClient {
    /// Client for the answer-generation model.
    pub fn generation(config: &OllamaConfig) -> Result<Self> {
        Self::for_model(
            config,
            config.generation_model.clone(),
            config.generation_temperature,
            config.generation_num_ctx,
        )
    }

    /// Client for the sensitive-data extraction model.
    pub fn anonymization(config: &OllamaConfig) -> Result<Self> {
        Self::for_model(
            config,
            config.anonymization_model.clone(),
            config.anonymization_temperature,
            config.anonymization_num_ctx,
        )
    }

    fn for_model(
        config: &OllamaConfig,
        model: String,
        temperature: f32,
        num_ctx: u32,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            num_ctx,
            max_retries: config.max_retries,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationModel for OllamaClient {
    async fn invoke(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            options: ModelOptions {
                temperature: self.temperature,
                num_ctx: self.num_ctx,
            },
        };

        let response: GenerateResponse =
            post_json(&self.client, &url, &request, self.max_retries)
                .await
                .with_context(|| format!("Ollama generate failed for model {}", self.model))?;

        Ok(response.response)
    }
}

/// Embedding client bound to the configured Ollama embedding model.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: &self.model,
            prompt: text,
        };

        let response: EmbeddingsResponse =
            post_json(&self.client, &url, &request, self.max_retries)
                .await
                .with_context(|| format!("Ollama embeddings failed for model {}", self.model))?;

        if response.embedding.is_empty() {
            bail!("Empty embedding from model {}", self.model);
        }

        Ok(response.embedding)
    }
}

fn build_http_client(config: &OllamaConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().context("Failed to build HTTP client")
}

/// POST a JSON body and decode the JSON response, with retry/backoff.
async fn post_json<B, T>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
    max_retries: u32,
) -> Result<T>
where
    B: Serialize,
    T: serde::de::DeserializeOwned,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client.post(url).json(body).send().await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<T>()
                        .await
                        .context("Failed to decode model server response");
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Model server error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("Model server error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}
