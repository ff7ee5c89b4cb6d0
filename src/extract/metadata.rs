use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::debug;

use crate::document::CatalogDocument;

pub const UNKNOWN_VERSION: &str = "Unknown";

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4})").unwrap());
static TITLE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{4}.*catalog)").unwrap());

/// First four-digit run of the file stem, then the whole "<year> ... catalog"
/// phrase on page 1, else `Unknown`.
pub fn resolve_version(file_stem: &str, doc: &dyn CatalogDocument) -> String {
    if let Some(year) = version_from_stem(file_stem) {
        return year;
    }

    if doc.page_count() > 0 {
        match doc.page_text(1) {
            Ok(text) => {
                if let Some(c) = TITLE_YEAR_RE.captures(&text) {
                    return c[1].to_string();
                }
            }
            Err(e) => debug!(error = %e, "Cannot read first page for version"),
        }
    }

    UNKNOWN_VERSION.to_string()
}

/// Filename step only, for catalogs that cannot be opened.
pub fn version_from_stem(file_stem: &str) -> Option<String> {
    YEAR_RE.captures(file_stem).map(|c| c[1].to_string())
}

/// PDF dates look like `D:20230115093000+05'00'`; only the day is used.
pub fn resolve_date(creation_date: Option<&str>) -> Option<NaiveDateTime> {
    let raw = creation_date?.strip_prefix("D:")?;
    let day = raw.get(..8)?;
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}
