//! Integration tests over the public API: ingestion idempotence and the
//! anonymize→retrieve→generate→deanonymize round trip, with stub models
//! so no Ollama server is required.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use legal_assistant::assistant::{LegalAssistant, EXTRACTION_FAILED_MESSAGE};
use legal_assistant::config::Config;
use legal_assistant::ingest;
use legal_assistant::llm::{EmbeddingModel, GenerationModel};
use legal_assistant::models::{QueryStatus, ScoredChunk};
use legal_assistant::privacy::SensitiveDataHandler;
use legal_assistant::store::{ChunkStore, SimilaritySearch};

/// Minimal valid PDF containing the given phrase, with a correct xref
/// table so pdf-extract can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}endstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Deterministic offline embedder: an 8-bin byte histogram.
struct HistogramEmbedder;

#[async_trait]
impl EmbeddingModel for HistogramEmbedder {
    fn model_name(&self) -> &str {
        "histogram-test-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut bins = vec![0.0f32; 8];
        for byte in text.bytes() {
            bins[(byte % 8) as usize] += 1.0;
        }
        Ok(bins)
    }
}

struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationModel for ScriptedModel {
    async fn invoke(&self, _system: Option<&str>, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

struct CountingIndex {
    calls: AtomicUsize,
}

#[async_trait]
impl SimilaritySearch for CountingIndex {
    async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

fn test_config(root: &TempDir) -> Config {
    let mut config = Config::default();
    config.db.path = root.path().join("data/legal.sqlite");
    config.documents.path = root.path().join("documents");
    config
}

async fn open_store(config: &Config) -> Arc<ChunkStore> {
    Arc::new(
        ChunkStore::connect(&config.db.path, Arc::new(HistogramEmbedder))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn populate_is_first_run_only_and_idempotent() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    fs::create_dir_all(&config.documents.path).unwrap();
    fs::write(
        config.documents.path.join("certidao.pdf"),
        minimal_pdf_with_phrase("Para emitir a certidao compareca ao cartorio"),
    )
    .unwrap();

    let store = open_store(&config).await;

    let summary = ingest::populate(&config, &store).await.unwrap().unwrap();
    assert!(summary.chunks_new > 0);
    assert_eq!(summary.chunks_unchanged, 0);
    let count_after_first = store.count().await.unwrap();

    // Second populate: the store already exists, nothing is re-ingested.
    assert!(ingest::populate(&config, &store).await.unwrap().is_none());
    assert_eq!(store.count().await.unwrap(), count_after_first);
}

#[tokio::test]
async fn rebuild_reproduces_the_same_chunk_ids() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    fs::create_dir_all(&config.documents.path).unwrap();
    fs::write(
        config.documents.path.join("certidao.pdf"),
        minimal_pdf_with_phrase("O registro civil de nascimento e gratuito"),
    )
    .unwrap();

    let store = open_store(&config).await;

    ingest::populate(&config, &store).await.unwrap().unwrap();
    let first_ids: Vec<String> = {
        let mut ids: Vec<String> = store.existing_hashes().await.unwrap().into_keys().collect();
        ids.sort();
        ids
    };
    assert!(first_ids.iter().all(|id| id.starts_with("certidao.pdf:0:")));

    let summary = ingest::rebuild(&config, &store).await.unwrap();
    assert_eq!(summary.chunks_new, first_ids.len());

    let mut second_ids: Vec<String> =
        store.existing_hashes().await.unwrap().into_keys().collect();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn ingested_documents_are_searchable() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    fs::create_dir_all(&config.documents.path).unwrap();
    fs::write(
        config.documents.path.join("certidao.pdf"),
        minimal_pdf_with_phrase("Prazo de quinze dias para registro"),
    )
    .unwrap();

    let store = open_store(&config).await;
    ingest::populate(&config, &store).await.unwrap().unwrap();

    let hits = store.similarity_search("registro", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].chunk.content.contains("registro"));
}

#[tokio::test]
async fn query_round_trip_restores_personal_data() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    fs::create_dir_all(&config.documents.path).unwrap();
    fs::write(
        config.documents.path.join("certidao.pdf"),
        minimal_pdf_with_phrase("O interessado deve apresentar documento de identidade"),
    )
    .unwrap();

    let store = open_store(&config).await;
    ingest::populate(&config, &store).await.unwrap().unwrap();

    let extraction = ScriptedModel::new(&[
        r#"{"dados": [{"categoria": "nome", "valor": "João Silva"}, {"categoria": "cpf", "valor": "123.456.789-00"}]}"#,
    ]);
    let generation = ScriptedModel::new(&["Prazer, [NOME]. Seu [CPF] foi registrado."]);

    let assistant = LegalAssistant::new(
        SensitiveDataHandler::new(extraction),
        store.clone(),
        generation,
        config.retrieval.top_k,
    );

    let report = assistant
        .process_query("Meu nome é João Silva e meu CPF é 123.456.789-00", &[])
        .await;

    assert_eq!(report.status, QueryStatus::Answered);
    assert_eq!(
        report.anonymized_query,
        "Meu nome é [NOME] e meu CPF é [CPF]"
    );
    assert_eq!(
        report.final_response,
        "Prazer, João Silva. Seu 123.456.789-00 foi registrado."
    );
    assert_eq!(report.replacements.len(), 2);
    assert!(!report.sources.is_empty());
}

#[tokio::test]
async fn failed_extraction_never_reaches_retrieval_or_generation() {
    let extraction = ScriptedModel::new(&[
        "Sure, here you go: {\"dados\": [}",
        "Sure, here you go: {\"dados\": [}",
        "Sure, here you go: {\"dados\": [}",
    ]);
    let generation = ScriptedModel::new(&["nunca chamado"]);
    let index = Arc::new(CountingIndex {
        calls: AtomicUsize::new(0),
    });

    let assistant = LegalAssistant::new(
        SensitiveDataHandler::new(extraction.clone()),
        index.clone(),
        generation.clone(),
        5,
    );

    let report = assistant
        .process_query("Meu CPF é 123.456.789-00", &[])
        .await;

    assert_eq!(report.status, QueryStatus::ExtractionFailed);
    assert_eq!(report.final_response, EXTRACTION_FAILED_MESSAGE);
    assert_eq!(extraction.calls(), 3);
    assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generation.calls(), 0);
}
