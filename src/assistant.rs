//! Query pipeline orchestration.
//!
//! One query flows anonymize → retrieve → prompt → generate → deanonymize.
//! Collaborators are injected at construction: the sensitive-data handler,
//! the similarity index, and the generation model all sit behind their
//! capability traits, so the pipeline is unit-testable with stubs.
//!
//! Every failure path produces a [`QueryReport`] rather than an error: the
//! UI layers only ever render reports. An extraction failure aborts the
//! query before retrieval — no PII-bearing text may leave the trust
//! boundary — while retrieval/generation failures end the query with a
//! generic message.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::AssistantError;
use crate::llm::GenerationModel;
use crate::models::{
    ConversationTurn, QueryReport, QueryStatus, ReplacementMap, Role, ScoredChunk, SourceRef,
};
use crate::privacy::SensitiveDataHandler;
use crate::store::SimilaritySearch;

/// Shown when sensitive-data extraction failed and the query was aborted.
pub const EXTRACTION_FAILED_MESSAGE: &str =
    "Não foi possível processar sua pergunta com segurança. Por favor, reformule e tente novamente.";

/// Shown when retrieval or generation failed after anonymization.
pub const PIPELINE_FAILED_MESSAGE: &str =
    "Ocorreu um erro ao processar sua consulta. Por favor, tente novamente.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub struct LegalAssistant {
    handler: SensitiveDataHandler,
    index: Arc<dyn SimilaritySearch>,
    model: Arc<dyn GenerationModel>,
    top_k: usize,
}

impl LegalAssistant {
    pub fn new(
        handler: SensitiveDataHandler,
        index: Arc<dyn SimilaritySearch>,
        model: Arc<dyn GenerationModel>,
        top_k: usize,
    ) -> Self {
        Self {
            handler,
            index,
            model,
            top_k,
        }
    }

    /// Run one question through the full pipeline.
    ///
    /// `history` is rendered into the prompt as alternating
    /// `Usuário:`/`Assistente:` lines; the caller owns it and decides
    /// whether failed queries are appended.
    pub async fn process_query(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> QueryReport {
        info!("received query");

        let (anonymized, replacements) = match self.handler.anonymize(question).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "extraction failed; aborting before retrieval");
                return extraction_failed_report();
            }
        };
        info!(replacements = replacements.len(), "query anonymized");

        let hits = match self
            .index
            .similarity_search(&anonymized, self.top_k)
            .await
            .map_err(AssistantError::Retrieval)
        {
            Ok(hits) => hits,
            Err(e) => {
                error!(error = %e, "aborting query");
                return pipeline_failed_report(anonymized, replacements);
            }
        };
        log_sources(&hits);

        let context = hits
            .iter()
            .map(|hit| hit.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let prompt = fill_prompt(&context, history, &anonymized);

        let raw_response = match self
            .model
            .invoke(None, &prompt)
            .await
            .map_err(AssistantError::Generation)
        {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "aborting query");
                return pipeline_failed_report(anonymized, replacements);
            }
        };

        let final_response = self.handler.deanonymize(&raw_response, &replacements);
        info!("query answered");

        QueryReport {
            status: QueryStatus::Answered,
            final_response,
            anonymized_query: anonymized,
            raw_response,
            replacements,
            sources: hits
                .iter()
                .map(|hit| SourceRef {
                    id: hit.chunk.id.clone(),
                    score: hit.score,
                })
                .collect(),
        }
    }
}

fn extraction_failed_report() -> QueryReport {
    QueryReport {
        status: QueryStatus::ExtractionFailed,
        final_response: EXTRACTION_FAILED_MESSAGE.to_string(),
        anonymized_query: String::new(),
        raw_response: String::new(),
        replacements: ReplacementMap::new(),
        sources: Vec::new(),
    }
}

fn pipeline_failed_report(anonymized_query: String, replacements: ReplacementMap) -> QueryReport {
    QueryReport {
        status: QueryStatus::PipelineFailed,
        final_response: PIPELINE_FAILED_MESSAGE.to_string(),
        anonymized_query,
        raw_response: String::new(),
        replacements,
        sources: Vec::new(),
    }
}

fn fill_prompt(context: &str, history: &[ConversationTurn], question: &str) -> String {
    format!(
        "Você é um assistente especializado em fornecer respostas objetivas, claras e baseadas \
         unicamente nas informações fornecidas. As respostas serão lidas por cidadãos comuns, \
         portanto utilize uma linguagem apropriada e de fácil entendimento.\n\
         Responda à questão com base exclusivamente no contexto abaixo:\n\
         {context}\n\n---\n\n\
         {history}Se a resposta não puder ser encontrada no contexto fornecido ou não houver \
         evidências, informe claramente que a informação não está disponível. Não invente ou \
         especule sobre a resposta.\n\
         Pergunta: {question}\n",
        context = context,
        history = render_history(history),
        question = question,
    )
}

fn render_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut out = String::from("Histórico da conversa:\n");
    for turn in history {
        let speaker = match turn.role {
            Role::User => "Usuário",
            Role::Assistant => "Assistente",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(&turn.content);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Log the retrieved sources sorted by score descending, for audit.
fn log_sources(hits: &[ScoredChunk]) {
    let mut sorted: Vec<&ScoredChunk> = hits.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (rank, hit) in sorted.iter().enumerate() {
        let preview: String = hit.chunk.content.chars().take(120).collect();
        info!(
            rank = rank + 1,
            id = %hit.chunk.id,
            score = hit.score,
            preview = %preview,
            "retrieved source"
        );
    }
}
