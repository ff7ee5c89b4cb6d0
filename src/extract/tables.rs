use crate::config::ExtractionConfig;
use crate::document::Table;
use crate::models::Part;

use super::identifiers::IdentifierMatcher;

/// Locates the identifier and description columns of a table by header keywords.
pub struct TableColumnResolver {
    identifier_keywords: Vec<String>,
    description_keywords: Vec<String>,
}

impl TableColumnResolver {
    pub fn new(cfg: &ExtractionConfig) -> Self {
        let lower = |words: &[String]| words.iter().map(|w| w.to_lowercase()).collect();
        TableColumnResolver {
            identifier_keywords: lower(&cfg.identifier_keywords),
            description_keywords: lower(&cfg.description_keywords),
        }
    }

    pub fn identifier_column(&self, header: &[Option<String>]) -> Option<usize> {
        find_column(header, &self.identifier_keywords)
    }

    pub fn description_column(&self, header: &[Option<String>]) -> Option<usize> {
        find_column(header, &self.description_keywords)
    }

    /// Parts from every table that has a header row, at least one data row
    /// and a resolvable identifier column.
    pub fn extract_parts(&self, tables: &[Table], page: u32, matcher: &IdentifierMatcher) -> Vec<Part> {
        let mut parts = Vec::new();

        for table in tables {
            let [header, rows @ ..] = table.as_slice() else {
                continue;
            };
            if rows.is_empty() {
                continue;
            }
            let Some(id_col) = self.identifier_column(header) else {
                continue;
            };
            let desc_col = self.description_column(header);

            for row in rows {
                let part_number = cell(row, id_col);
                if !matcher.accepts(part_number) {
                    continue;
                }
                let description = desc_col.map(|c| cell(row, c)).unwrap_or_default();
                parts.push(Part::new(part_number, description, "", page));
            }
        }

        parts
    }
}

fn find_column(header: &[Option<String>], keywords: &[String]) -> Option<usize> {
    header.iter().position(|h| {
        h.as_deref().is_some_and(|h| {
            let h = h.to_lowercase();
            keywords.iter().any(|kw| h.contains(kw.as_str()))
        })
    })
}

fn cell(row: &[Option<String>], idx: usize) -> &str {
    row.get(idx)
        .and_then(|c| c.as_deref())
        .map(str::trim)
        .unwrap_or("")
}
