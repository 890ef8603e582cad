//! Ingestion pipeline orchestration.
//!
//! Coordinates the document flow: PDF loading → normalization → chunking →
//! embedding → storage. `populate` is a first-run-only operation (no-op
//! when the store already holds chunks); `rebuild` clears the store and
//! repopulates unconditionally. Dedup by deterministic chunk id makes
//! re-ingestion of unchanged documents add zero new chunks; a chunk whose
//! id exists but whose content hash changed is refreshed in place.

use anyhow::Result;
use tracing::info;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::pdf;
use crate::store::ChunkStore;

/// Counters describing one ingestion run.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestSummary {
    pub pages: usize,
    pub chunks_total: usize,
    pub chunks_new: usize,
    pub chunks_refreshed: usize,
    pub chunks_unchanged: usize,
}

/// First-run population. Returns `None` without touching the documents
/// directory when the store already holds chunks.
pub async fn populate(config: &Config, store: &ChunkStore) -> Result<Option<IngestSummary>> {
    if store.count().await? > 0 {
        info!("store already populated; skipping");
        return Ok(None);
    }

    Ok(Some(ingest_documents(config, store).await?))
}

/// Explicit refresh: clear the store, then repopulate from scratch.
pub async fn rebuild(config: &Config, store: &ChunkStore) -> Result<IngestSummary> {
    info!("clearing store for rebuild");
    store.clear().await?;
    ingest_documents(config, store).await
}

async fn ingest_documents(config: &Config, store: &ChunkStore) -> Result<IngestSummary> {
    let pages = pdf::load_directory(&config.documents.path)?;
    let chunks = chunk_pages(
        &pages,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );

    let existing = store.existing_hashes().await?;

    let mut summary = IngestSummary {
        pages: pages.len(),
        chunks_total: chunks.len(),
        ..Default::default()
    };

    let mut pending = Vec::new();
    for chunk in chunks {
        match existing.get(&chunk.id) {
            None => {
                summary.chunks_new += 1;
                pending.push(chunk);
            }
            Some(hash) if *hash != chunk.hash => {
                summary.chunks_refreshed += 1;
                pending.push(chunk);
            }
            Some(_) => summary.chunks_unchanged += 1,
        }
    }

    if !pending.is_empty() {
        store.embed_and_upsert(&pending).await?;
    }

    info!(
        pages = summary.pages,
        new = summary.chunks_new,
        refreshed = summary.chunks_refreshed,
        unchanged = summary.chunks_unchanged,
        "ingestion finished"
    );

    Ok(summary)
}
