use regex::Regex;

use crate::config::{ExtractionConfig, PageRange};

const DEFAULT_CATEGORY: &str = "Hardware";

pub struct CategoryClassifier {
    groups: Vec<Regex>,
    scan_lines: usize,
    page_ranges: Vec<PageRange>,
    fallback: String,
}

impl CategoryClassifier {
    pub fn new(cfg: &ExtractionConfig) -> Result<Self, regex::Error> {
        let groups = cfg
            .category_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let mut page_ranges = cfg.page_categories.clone();
        page_ranges.sort_by_key(|r| r.below);
        Ok(CategoryClassifier {
            groups,
            scan_lines: cfg.category_scan_lines,
            page_ranges,
            fallback: cfg.fallback_category.clone(),
        })
    }

    /// Always returns a non-empty label. The earliest line matching any
    /// group wins; within a line, groups are tried in order.
    pub fn classify(&self, page_text: &str, page: u32) -> String {
        for line in page_text.lines().take(self.scan_lines) {
            for group in &self.groups {
                if let Some(m) = group.find(line) {
                    let label = title_case(m.as_str());
                    if !label.is_empty() {
                        return label;
                    }
                }
            }
        }

        self.by_page(page)
    }

    fn by_page(&self, page: u32) -> String {
        self.page_ranges
            .iter()
            .find(|r| page < r.below)
            .map(|r| r.category.as_str())
            .filter(|c| !c.trim().is_empty())
            .or(Some(self.fallback.as_str()).filter(|c| !c.trim().is_empty()))
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string()
    }
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
