use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{panic_message, DocumentError};

/// A table as read off a page: ordered rows of ordered cells, any of which may be blank.
pub type Table = Vec<Vec<Option<String>>>;

static CELL_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t+|\s*\|\s*| {2,}").unwrap());

/// Read access to a parsed catalog. Pages are numbered from 1.
pub trait CatalogDocument {
    fn page_count(&self) -> usize;
    fn page_text(&self, page: usize) -> Result<String, DocumentError>;
    fn page_tables(&self, page: usize) -> Result<Vec<Table>, DocumentError>;
    /// Raw `CreationDate` entry of the document info dictionary, if any.
    fn creation_date(&self) -> Option<String>;
}

/// A PDF catalog. The whole-document text layer from pdf-extract is used
/// when it reads cleanly; otherwise each page is read on its own through
/// lopdf so one bad page cannot sink the rest.
pub struct PdfDocument {
    doc: lopdf::Document,
    page_numbers: Vec<u32>,
    text_layer: Option<Vec<String>>,
    creation_date: Option<String>,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let doc = match catch_unwind(AssertUnwindSafe(|| lopdf::Document::load_mem(&bytes))) {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => return Err(DocumentError::Parse(e.to_string())),
            Err(payload) => return Err(DocumentError::Parse(panic_message(payload.as_ref()))),
        };
        let creation_date = info_entry(&doc, b"CreationDate");
        let page_numbers: Vec<u32> = doc.get_pages().into_keys().collect();

        let text_layer = match catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })) {
            Ok(Ok(pages)) if pages.len() == page_numbers.len() => Some(pages),
            Ok(Ok(pages)) => {
                warn!(
                    text_pages = pages.len(),
                    pages = page_numbers.len(),
                    "Text layer page count mismatch, reading pages individually"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Text layer unreadable, reading pages individually");
                None
            }
            Err(payload) => {
                warn!(
                    panic = %panic_message(payload.as_ref()),
                    "Text layer extraction panicked, reading pages individually"
                );
                None
            }
        };
        debug!(pages = page_numbers.len(), text_layer = text_layer.is_some(), "Loaded PDF");

        Ok(PdfDocument {
            doc,
            page_numbers,
            text_layer,
            creation_date,
        })
    }
}

impl CatalogDocument for PdfDocument {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn page_text(&self, page: usize) -> Result<String, DocumentError> {
        let index = page
            .checked_sub(1)
            .filter(|&i| i < self.page_numbers.len())
            .ok_or(DocumentError::PageOutOfRange(page))?;
        if let Some(layer) = &self.text_layer {
            return Ok(layer[index].clone());
        }
        let number = self.page_numbers[index];
        guard_page(page, || self.doc.extract_text(&[number]))
    }

    fn page_tables(&self, page: usize) -> Result<Vec<Table>, DocumentError> {
        self.page_text(page).map(|text| tables_from_text(&text))
    }

    fn creation_date(&self) -> Option<String> {
        self.creation_date.clone()
    }
}

/// Run one page read, turning both errors and panics into a page failure.
fn guard_page<T, E: std::fmt::Display>(
    page: usize,
    read: impl FnOnce() -> Result<T, E>,
) -> Result<T, DocumentError> {
    match catch_unwind(AssertUnwindSafe(read)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DocumentError::Page {
            page,
            message: e.to_string(),
        }),
        Err(payload) => Err(DocumentError::Page {
            page,
            message: format!("reader panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

fn info_entry(doc: &lopdf::Document, key: &[u8]) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        lopdf::Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match info.as_dict().ok()?.get(key).ok()? {
        lopdf::Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// Recover table grids from a text layer: two or more consecutive lines that
/// each split into at least two cells (tabs, pipes, or wide gaps) form a table
/// whose first line is the header.
pub fn tables_from_text(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut current: Table = Vec::new();

    for line in text.lines() {
        match split_cells(line) {
            Some(cells) => current.push(cells),
            None => flush_table(&mut current, &mut tables),
        }
    }
    flush_table(&mut current, &mut tables);

    tables
}

fn split_cells(line: &str) -> Option<Vec<Option<String>>> {
    let trimmed = line.trim().trim_matches('|');
    if trimmed.trim().is_empty() {
        return None;
    }
    let cells: Vec<Option<String>> = CELL_SPLIT_RE
        .split(trimmed.trim())
        .map(|c| {
            let c = c.trim();
            (!c.is_empty()).then(|| c.to_string())
        })
        .collect();
    (cells.len() >= 2).then_some(cells)
}

fn flush_table(current: &mut Table, tables: &mut Vec<Table>) {
    if current.len() >= 2 {
        tables.push(std::mem::take(current));
    } else {
        current.clear();
    }
}
