pub mod category;
pub mod dedup;
pub mod identifiers;
pub mod metadata;
pub mod tables;

use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::document::{CatalogDocument, PdfDocument};
use crate::error::DocumentError;
use crate::models::{CatalogMetadata, ErrorKind, Part, ProcessingError};
use category::CategoryClassifier;
use identifiers::IdentifierMatcher;
use tables::TableColumnResolver;

static LEADING_NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\W+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Output of a catalog pass: deduplicated parts, catalog metadata, and the
/// pages that could not be read.
#[derive(Debug)]
pub struct Extraction {
    pub parts: Vec<Part>,
    pub metadata: CatalogMetadata,
    pub errors: Vec<ProcessingError>,
}

/// The catalog could not be opened at all.
#[derive(Debug, Error)]
#[error("cannot extract {}: {source}", .metadata.filename)]
pub struct ExtractionFailure {
    /// Filename only; `total_pages` stays 0.
    pub metadata: CatalogMetadata,
    #[source]
    pub source: DocumentError,
}

impl ExtractionFailure {
    pub fn error_record(&self) -> ProcessingError {
        ProcessingError::run_wide(ErrorKind::Parsing, self.to_string())
    }
}

pub struct ExtractionPipeline {
    cfg: ExtractionConfig,
    vendor: String,
    matcher: IdentifierMatcher,
    tables: TableColumnResolver,
    classifier: CategoryClassifier,
}

impl ExtractionPipeline {
    pub fn new(cfg: &ExtractionConfig, vendor: &str) -> Result<Self, regex::Error> {
        Ok(ExtractionPipeline {
            cfg: cfg.clone(),
            vendor: vendor.to_string(),
            matcher: IdentifierMatcher::new(cfg)?,
            tables: TableColumnResolver::new(cfg),
            classifier: CategoryClassifier::new(cfg)?,
        })
    }

    pub fn extract_catalog(&self, path: &Path) -> Result<Extraction, ExtractionFailure> {
        let doc = PdfDocument::open(path).map_err(|source| {
            // Version comes from the filename alone when the file cannot be read.
            let mut meta = CatalogMetadata::new(file_name(path));
            meta.catalog_version = metadata::version_from_stem(&file_stem(path))
                .unwrap_or_else(|| metadata::UNKNOWN_VERSION.to_string());
            ExtractionFailure {
                metadata: meta,
                source,
            }
        })?;
        Ok(self.extract_document(&doc, path))
    }

    /// Walk every page in order. A page that fails to read contributes no
    /// parts and one parsing error; the pass itself always completes.
    pub fn extract_document(&self, doc: &dyn CatalogDocument, path: &Path) -> Extraction {
        let total_pages = doc.page_count();
        let stem = file_stem(path);
        info!(catalog = %path.display(), pages = total_pages, "Extracting parts");

        let pb = ProgressBar::new(total_pages as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut raw = Vec::new();
        let mut errors = Vec::new();

        for page in 1..=total_pages {
            let page_ref = u32::try_from(page).unwrap_or(u32::MAX);
            match self.extract_page(doc, page, page_ref) {
                Ok(parts) => raw.extend(parts),
                Err(e) => {
                    warn!(page, error = %e, "Page extraction failed");
                    // No identifier; the page reference locates it.
                    errors.push(
                        ProcessingError::new("", ErrorKind::Parsing, e.to_string()).on_page(page_ref),
                    );
                }
            }
            pb.inc(1);
            if self.cfg.progress_interval > 0 && page % self.cfg.progress_interval == 0 {
                info!(page, total_pages, found = raw.len(), "Extraction progress");
            }
        }
        pb.finish_and_clear();

        let found = raw.len();
        let mut parts = dedup::dedupe(raw);
        info!(found, unique = parts.len(), "Deduplicated parts");

        let extracted_at = Utc::now();
        let source_file = file_name(path);
        for part in &mut parts {
            part.source_catalog = stem.clone();
            part.vendor = self.vendor.clone();
            part.metadata
                .insert("extraction_date".into(), extracted_at.to_rfc3339());
            part.metadata.insert("source_file".into(), source_file.clone());
        }

        let mut meta = CatalogMetadata::new(source_file);
        meta.total_pages = total_pages;
        meta.processing_date = extracted_at;
        meta.total_parts = parts.len();
        meta.successful_extractions = parts.iter().filter(|p| !p.part_number.is_empty()).count();
        meta.failed_extractions = meta.total_parts - meta.successful_extractions;
        meta.catalog_version = metadata::resolve_version(&stem, doc);
        meta.catalog_date = metadata::resolve_date(doc.creation_date().as_deref());

        Extraction {
            parts,
            metadata: meta,
            errors,
        }
    }

    fn extract_page(
        &self,
        doc: &dyn CatalogDocument,
        page: usize,
        page_ref: u32,
    ) -> Result<Vec<Part>, DocumentError> {
        let text = doc.page_text(page)?;
        let mut parts = self.text_parts(&text, page_ref);
        let tables = doc.page_tables(page)?;
        parts.extend(self.tables.extract_parts(&tables, page_ref, &self.matcher));
        Ok(parts)
    }

    fn text_parts(&self, text: &str, page: u32) -> Vec<Part> {
        let mut candidates = self.matcher.candidates(text).peekable();
        if candidates.peek().is_none() {
            return Vec::new();
        }

        let category = self.classifier.classify(text, page);
        candidates
            .map(|c| {
                debug!(part_number = c.text, page, rule = c.rule, offset = c.start, "Identifier match");
                let description = self.description_after(&text[c.end..]);
                Part::new(c.text, description, category.clone(), page)
            })
            .collect()
    }

    /// First substantial line in the window that follows an identifier.
    fn description_after(&self, rest: &str) -> String {
        let window: String = rest.chars().take(self.cfg.description_window).collect();
        window
            .lines()
            .map(str::trim)
            .find(|line| line.chars().count() >= self.cfg.description_min_len)
            .map(|line| {
                let line = LEADING_NON_WORD_RE.replace(line, "");
                let line = WHITESPACE_RE.replace_all(&line, " ");
                line.chars().take(self.cfg.description_max_len).collect()
            })
            .unwrap_or_default()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
