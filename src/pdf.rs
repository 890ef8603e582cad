//! PDF loading as per-page text blocks.
//!
//! Each PDF in the documents directory is loaded in full and decomposed
//! into one [`PageBlock`] per page, so chunk identifiers can be anchored
//! to `(source, page)`. Extraction is delegated to `pdf-extract`; a file
//! that fails to parse is skipped with a warning rather than aborting the
//! whole ingestion run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::models::PageBlock;

/// List all PDF files directly under `dir`, sorted by file name so chunk
/// ids are assigned in a stable order across runs.
pub fn list_pdf_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Documents directory does not exist: {}", dir.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    Ok(files)
}

/// Load one PDF as a sequence of per-page text blocks.
///
/// The block `source` is the file name, not the full path, so identifiers
/// stay stable when the documents directory moves.
pub fn load_pdf_pages(path: &Path) -> Result<Vec<PageBlock>> {
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let pages = pdf_extract::extract_text_by_pages(path)
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(page, text)| PageBlock {
            source: source.clone(),
            page: page as i64,
            text,
        })
        .collect())
}

/// Load every PDF in the directory. Unreadable files are skipped.
pub fn load_directory(dir: &Path) -> Result<Vec<PageBlock>> {
    let mut blocks = Vec::new();

    for path in list_pdf_files(dir)? {
        match load_pdf_pages(&path) {
            Ok(pages) => blocks.extend(pages),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable PDF"),
        }
    }

    Ok(blocks)
}
