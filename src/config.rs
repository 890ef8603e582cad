use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/legal.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_path")]
    pub path: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            path: default_documents_path(),
        }
    }
}

fn default_documents_path() -> PathBuf {
    PathBuf::from("documents")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Chunk window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of the same page.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

/// Settings for the Ollama model server.
///
/// Two generation models are configured: the response model that answers
/// questions and a separate anonymization model for sensitive-data
/// extraction, which runs at a lower temperature.
#[derive(Debug, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_anonymization_model")]
    pub anonymization_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default = "default_anonymization_temperature")]
    pub anonymization_temperature: f32,
    #[serde(default = "default_generation_num_ctx")]
    pub generation_num_ctx: u32,
    #[serde(default = "default_anonymization_num_ctx")]
    pub anonymization_num_ctx: u32,
    /// Transport-level retries for 5xx and connection errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request timeout. No timeout is applied when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            generation_model: default_generation_model(),
            anonymization_model: default_anonymization_model(),
            embedding_model: default_embedding_model(),
            generation_temperature: default_generation_temperature(),
            anonymization_temperature: default_anonymization_temperature(),
            generation_num_ctx: default_generation_num_ctx(),
            anonymization_num_ctx: default_anonymization_num_ctx(),
            max_retries: default_max_retries(),
            timeout_secs: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_model() -> String {
    "gemma3:1b".to_string()
}
fn default_anonymization_model() -> String {
    "mistral:instruct".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_generation_temperature() -> f32 {
    0.4
}
fn default_anonymization_temperature() -> f32 {
    0.1
}
fn default_generation_num_ctx() -> u32 {
    2048
}
fn default_anonymization_num_ctx() -> u32 {
    4096
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.ollama.base_url.trim().is_empty() {
        anyhow::bail!("ollama.base_url must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 80);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert!(config.ollama.timeout_secs.is_none());
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            top_k = 3

            [ollama]
            generation_model = "llama3.2:3b-instruct-fp16"
            timeout_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.ollama.generation_model, "llama3.2:3b-instruct-fp16");
        assert_eq!(config.ollama.timeout_secs, Some(120));
        assert_eq!(config.chunking.chunk_size, 800);
    }
}
