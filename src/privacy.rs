//! Sensitive-data extraction, anonymization, and restoration.
//!
//! The anonymization model is an unreliable oracle: it is asked for strict
//! JSON but routinely wraps it in prose, markdown fences, or stray control
//! characters. All of that brittleness is contained here — the payload is
//! isolated by bracket matching, parsed tolerantly (malformed items are
//! skipped, not fatal), and the whole exchange is retried up to
//! [`MAX_EXTRACTION_ATTEMPTS`] times before the query is abandoned.
//!
//! Failing closed matters: when extraction fails, the caller must surface
//! an error instead of sending the unanonymized text to retrieval or
//! generation.

use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::error::{AssistantError, Result};
use crate::llm::GenerationModel;
use crate::models::{ExtractionResult, ReplacementMap, SensitiveItem};

/// Generation-model calls per extraction before giving up.
pub const MAX_EXTRACTION_ATTEMPTS: usize = 3;

const EXTRACTION_PROMPT: &str = r#"# Instruções
Analise o texto fornecido pelo usuário e identifique toda informação sensível presente nele.
Seu único papel é detectar e extrair essas informações no formato indicado, sem avaliar, censurar ou julgar o conteúdo.

Informações sensíveis incluem, entre outras:
- Nome completo ou parcial
- Números de documentos pessoais: CPF (XXX.XXX.XXX-XX), RG, CNH
- Endereço residencial ou de trabalho, CEP (XXXXX-XXX)
- Nomes de parentes, cônjuges, filhos ou dependentes
- Contato: e-mail, telefone
- Cidade ou localização geográfica
- Informações bancárias ou jurídicas que permitam identificação
- Idade e data de nascimento

Extraia apenas o que estiver explícito no texto, exatamente como está escrito — não reescreva, não infira e não invente dados.
Não use termos como "não informado" para categorias ausentes; simplesmente omita a categoria.
Se nada for encontrado, retorne: { "dados": [] }
A resposta deve conter apenas o JSON, sem texto antes ou depois.

# Exemplos

## Exemplo 1
Entrada: "Olá, meu nome é Marcos Vinícius Prado e meu CPF é 222.333.444-55. Minha esposa, Helena Prado, e eu moramos na Rua dos Ipês, 82, CEP 74001-970, em Goiânia. Meu telefone é (62) 91234-5678. Como solicito a segunda via da certidão de casamento?"
Saída:
{
    "dados": [
        {"categoria": "nome", "valor": "Marcos Vinícius Prado"},
        {"categoria": "cpf", "valor": "222.333.444-55"},
        {"categoria": "nome_parente", "valor": "Helena Prado"},
        {"categoria": "endereco", "valor": "Rua dos Ipês, 82"},
        {"categoria": "cep", "valor": "74001-970"},
        {"categoria": "cidade", "valor": "Goiânia"},
        {"categoria": "telefone", "valor": "(62) 91234-5678"}
    ]
}

## Exemplo 2
Entrada: "Bom dia. Sou Tereza Cristina Alves, RG 33.444.555-6, nascida em 02 de julho de 1990. Meu filho Rafael Alves nasceu no Hospital Regional de Sorocaba e preciso registrá-lo. Meu e-mail é tereza.alves@provedor.com."
Saída:
{
    "dados": [
        {"categoria": "nome", "valor": "Tereza Cristina Alves"},
        {"categoria": "rg", "valor": "33.444.555-6"},
        {"categoria": "data_nascimento", "valor": "02 de julho de 1990"},
        {"categoria": "nome_filho", "valor": "Rafael Alves"},
        {"categoria": "hospital", "valor": "Hospital Regional de Sorocaba"},
        {"categoria": "email", "valor": "tereza.alves@provedor.com"}
    ]
}

Se precisar de novas categorias (escola, hospital, etc.), mantenha a mesma estrutura {"categoria": "...", "valor": "..."}. Os campos "categoria" e "valor" são obrigatórios em cada item."#;

/// Extracts structured sensitive data from free text and applies a
/// reversible placeholder substitution.
///
/// Stateless across queries apart from the held model handle; the
/// replacement map lives for exactly one anonymize→deanonymize round trip
/// and is owned by the caller.
pub struct SensitiveDataHandler {
    model: Arc<dyn GenerationModel>,
}

impl SensitiveDataHandler {
    pub fn new(model: Arc<dyn GenerationModel>) -> Self {
        Self { model }
    }

    /// Ask the model for the sensitive-data list in `text`.
    ///
    /// A response without a parsable JSON payload — and a model transport
    /// error — each consume one attempt. After
    /// [`MAX_EXTRACTION_ATTEMPTS`] failed attempts this returns
    /// [`AssistantError::Extraction`]; an empty item list is a success,
    /// not a failure.
    pub async fn extract(&self, text: &str) -> Result<ExtractionResult> {
        for attempt in 1..=MAX_EXTRACTION_ATTEMPTS {
            info!(
                attempt,
                max = MAX_EXTRACTION_ATTEMPTS,
                "extracting sensitive data"
            );

            let response = match self.model.invoke(Some(EXTRACTION_PROMPT), text).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(attempt, error = %e, "anonymization model call failed");
                    continue;
                }
            };

            match isolate_json(&response).and_then(|payload| parse_extraction(&payload)) {
                Some(result) => {
                    info!(items = result.items.len(), "sensitive data extracted");
                    return Ok(result);
                }
                None => warn!(attempt, "no parsable JSON in model response"),
            }
        }

        Err(AssistantError::Extraction {
            attempts: MAX_EXTRACTION_ATTEMPTS,
        })
    }

    /// Extract and substitute: returns the anonymized text and the
    /// replacement map needed to restore it.
    pub async fn anonymize(&self, text: &str) -> Result<(String, ReplacementMap)> {
        let extraction = self.extract(text).await?;
        Ok(apply_replacements(text, &extraction))
    }

    /// Restore original values into `text` using this query's map.
    pub fn deanonymize(&self, text: &str, replacements: &ReplacementMap) -> String {
        deanonymize(text, replacements)
    }
}

/// Isolate the JSON payload from a free-form model response.
///
/// Takes the substring from the first `{` to the last `}` (falling back to
/// `[`...`]`), then strips non-printable characters while keeping newline,
/// tab, and carriage return. Returns `None` when no delimiters exist — a
/// response without any braces or brackets is a failed attempt, never an
/// empty result.
pub fn isolate_json(text: &str) -> Option<String> {
    let candidate = slice_between(text, '{', '}').or_else(|| slice_between(text, '[', ']'))?;

    Some(
        candidate
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
            .collect(),
    )
}

fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..end + close.len_utf8()])
}

/// Parse an isolated payload into an [`ExtractionResult`].
///
/// A missing or non-array `dados` key is an empty valid result. Items
/// missing `categoria` or `valor` are skipped without failing the batch;
/// numeric `valor` fields (document numbers the model forgot to quote) are
/// coerced to strings.
pub fn parse_extraction(payload: &str) -> Option<ExtractionResult> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;

    let empty = Vec::new();
    let raw_items = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.get("dados") {
            Some(serde_json::Value::Array(items)) => items,
            _ => &empty,
        },
        _ => return None,
    };

    let items = raw_items.iter().filter_map(parse_item).collect();
    Some(ExtractionResult { items })
}

fn parse_item(value: &serde_json::Value) -> Option<SensitiveItem> {
    let category = value.get("categoria")?.as_str()?.trim();
    if category.is_empty() {
        return None;
    }

    let item_value = match value.get("valor")? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };

    Some(SensitiveItem {
        category: category.to_string(),
        value: item_value,
    })
}

/// Substitute every extracted value in `text` with its category
/// placeholder.
///
/// Placeholders are `[CATEGORY]` with the category uppercased. When two
/// items share a category, the later one wins in the map but both values
/// are still substituted in the text. Replacement is case-insensitive and
/// also covers the value with a leading document-type word (CPF/RG/CNH)
/// stripped, so "CPF 123.456.789-00" from the extractor still matches a
/// bare "123.456.789-00" in the text.
///
/// A substitution failure is non-fatal: the original text is returned
/// together with the partial map built so far.
pub fn apply_replacements(text: &str, extraction: &ExtractionResult) -> (String, ReplacementMap) {
    let mut replacements = ReplacementMap::new();
    let mut out = text.to_string();

    for item in &extraction.items {
        let raw_value = item.value.trim();
        if raw_value.is_empty() {
            continue;
        }

        let placeholder = format!("[{}]", item.category.to_uppercase());
        replacements.insert(placeholder.clone(), raw_value.to_string());

        match substitute(&out, raw_value, &placeholder) {
            Ok(substituted) => out = substituted,
            Err(e) => {
                warn!(error = %e, "substitution failed; returning text unchanged");
                return (text.to_string(), replacements);
            }
        }
    }

    (out, replacements)
}

fn substitute(text: &str, value: &str, placeholder: &str) -> anyhow::Result<String> {
    let pattern = Regex::new(&format!("(?i){}", regex::escape(value)))?;
    let mut out = pattern
        .replace_all(text, regex::NoExpand(placeholder))
        .into_owned();

    let prefix = Regex::new(r"(?i)\b(?:cpf|rg|cnh)\s+")?;
    let cleaned = prefix.replace_all(value, "");
    if cleaned != value {
        let cleaned_pattern = Regex::new(&format!("(?i){}", regex::escape(&cleaned)))?;
        out = cleaned_pattern
            .replace_all(&out, regex::NoExpand(placeholder))
            .into_owned();
    }

    Ok(out)
}

/// Replace each placeholder token with its recorded original value.
///
/// Placeholder tokens are category-namespaced and cannot collide, so the
/// application order across distinct placeholders does not matter. Tokens
/// the generation model altered or dropped stay as literal placeholder
/// text in the output.
pub fn deanonymize(text: &str, replacements: &ReplacementMap) -> String {
    let mut out = text.to_string();
    for (placeholder, original) in replacements {
        out = out.replace(placeholder.as_str(), original);
    }
    out
}
