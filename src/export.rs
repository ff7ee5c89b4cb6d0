use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::aggregate::Statistics;
use crate::config::OutputConfig;
use crate::models::{CatalogMetadata, Part, PartStatus, ProcessingError, ProcessingSession};

const BACKUP_VERSION: &str = "1.0";

pub const PART_COLUMNS: [&str; 10] = [
    "sku",
    "part_number",
    "description",
    "category",
    "unit_price",
    "last_updated",
    "source_catalog",
    "vendor",
    "status",
    "page_reference",
];

pub const DASHBOARD_COLUMNS: [&str; 9] = [
    "sku",
    "part_number",
    "description",
    "category",
    "unit_price",
    "last_updated",
    "source_catalog",
    "vendor",
    "status",
];

pub const ERROR_COLUMNS: [&str; 6] = [
    "part_number",
    "error_type",
    "error_message",
    "timestamp",
    "retry_count",
    "page_reference",
];

/// One row of the record-set export; field order is the column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRow {
    pub sku: String,
    pub part_number: String,
    pub description: String,
    pub category: String,
    pub unit_price: Option<Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
    pub source_catalog: String,
    pub vendor: String,
    pub status: PartStatus,
    pub page_reference: u32,
}

impl From<&Part> for PartRow {
    fn from(p: &Part) -> Self {
        PartRow {
            sku: p.sku().to_string(),
            part_number: p.part_number.clone(),
            description: p.description.clone(),
            category: p.category.clone(),
            unit_price: p.price,
            last_updated: p.last_price_update,
            source_catalog: p.source_catalog.clone(),
            vendor: p.vendor.clone(),
            status: p.status,
            page_reference: p.page_reference,
        }
    }
}

impl From<PartRow> for Part {
    fn from(row: PartRow) -> Self {
        let mut part = Part::new(row.part_number, row.description, row.category, row.page_reference);
        if row.sku != part.part_number {
            part.sku = row.sku;
        }
        part.price = row.unit_price;
        part.last_price_update = row.last_updated;
        part.source_catalog = row.source_catalog;
        part.vendor = row.vendor;
        part.status = row.status;
        part
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardRow {
    pub sku: String,
    pub part_number: String,
    pub description: String,
    pub category: String,
    pub unit_price: Option<Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
    pub source_catalog: String,
    pub vendor: String,
    pub status: PartStatus,
}

impl DashboardRow {
    fn new(p: &Part, description_len: usize) -> Self {
        DashboardRow {
            sku: p.sku().to_string(),
            part_number: p.part_number.clone(),
            description: p.description.chars().take(description_len).collect(),
            category: p.category.clone(),
            unit_price: p.price,
            last_updated: p.last_price_update,
            source_catalog: p.source_catalog.clone(),
            vendor: p.vendor.clone(),
            status: p.status,
        }
    }
}

/// Writes one run's output files under the data directory. All files of a
/// run share the session id and one timestamp.
pub struct Exporter<'a> {
    out: &'a OutputConfig,
    session_id: String,
    stamp: String,
}

impl<'a> Exporter<'a> {
    pub fn new(out: &'a OutputConfig, session_id: &str) -> Result<Self> {
        for dir in [out.extracts_dir(), out.outputs_dir(), out.errors_dir(), out.backups_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(Exporter {
            out,
            session_id: session_id.to_string(),
            stamp: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
        })
    }

    fn file(&self, dir: PathBuf, prefix: &str, ext: &str) -> PathBuf {
        dir.join(sanitize_filename(&format!(
            "{prefix}_{}_{}.{ext}",
            self.session_id, self.stamp
        )))
    }

    pub fn save_parts_json(&self, parts: &[Part]) -> Result<PathBuf> {
        let path = self.file(self.out.extracts_dir(), "parts_data", "json");
        let rows: Vec<PartRow> = parts.iter().map(PartRow::from).collect();
        let doc = json!({
            "metadata": {
                "session_id": self.session_id,
                "timestamp": self.stamp,
                "total_parts": parts.len(),
                "parts_with_prices": parts.iter().filter(|p| p.price.is_some()).count(),
            },
            "parts": rows,
        });
        write_json(&path, &doc)?;
        info!(path = %path.display(), parts = parts.len(), "Saved parts JSON");
        Ok(path)
    }

    pub fn save_parts_csv(&self, parts: &[Part]) -> Result<PathBuf> {
        let path = self.file(self.out.extracts_dir(), "parts", "csv");
        write_csv(&path, &PART_COLUMNS, parts.iter().map(PartRow::from))?;
        info!(path = %path.display(), parts = parts.len(), "Saved parts CSV");
        Ok(path)
    }

    /// Priced and active parts only, followed by a data-quality check.
    pub fn save_dashboard_csv(&self, parts: &[Part]) -> Result<PathBuf> {
        let path = self.file(self.out.outputs_dir(), "lou_dashboard", "csv");
        let rows: Vec<DashboardRow> = parts
            .iter()
            .filter(|p| p.status.is_sellable())
            .map(|p| DashboardRow::new(p, self.out.dashboard_description_len))
            .collect();
        info!(rows = rows.len(), "Generating dashboard CSV");
        write_csv(&path, &DASHBOARD_COLUMNS, rows.iter())?;

        let issues = validate_dashboard(&rows);
        if issues.is_empty() {
            info!(path = %path.display(), "Dashboard CSV validation passed");
        } else {
            warn!(path = %path.display(), "Dashboard CSV validation issues: {}", issues.join(", "));
        }
        Ok(path)
    }

    pub fn save_errors(&self, errors: &[ProcessingError]) -> Result<PathBuf> {
        let path = self.file(self.out.errors_dir(), "errors", "csv");
        write_csv(&path, &ERROR_COLUMNS, errors.iter())?;
        info!(path = %path.display(), errors = errors.len(), "Saved error log");
        Ok(path)
    }

    pub fn save_backup(&self, parts: &[Part], stats: &Statistics) -> Result<PathBuf> {
        let path = self.file(self.out.backups_dir(), "backup", "json");
        let rows: Vec<PartRow> = parts.iter().map(PartRow::from).collect();
        let doc = json!({
            "backup_metadata": {
                "session_id": self.session_id,
                "timestamp": self.stamp,
                "total_parts": parts.len(),
                "backup_version": BACKUP_VERSION,
            },
            "parts": rows,
            "statistics": stats,
        });
        write_json(&path, &doc)?;
        info!(path = %path.display(), "Created backup");
        Ok(path)
    }

    pub fn save_session(&self, session: &ProcessingSession) -> Result<PathBuf> {
        let path = self
            .out
            .extracts_dir()
            .join(sanitize_filename(&format!("session_{}.json", session.session_id)));
        let doc = json!({
            "session_id": session.session_id,
            "start_time": session.start_time,
            "end_time": session.end_time,
            "duration_seconds": session.duration(),
            "parts_processed": session.parts_processed,
            "prices_updated": session.prices_updated,
            "errors_count": session.errors_count,
            "output_file": session.output_file,
        });
        write_json(&path, &doc)?;
        info!(path = %path.display(), "Saved session metadata");
        Ok(path)
    }

    pub fn save_catalog_metadata(&self, meta: &CatalogMetadata) -> Result<PathBuf> {
        let stem = Path::new(&meta.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = self
            .out
            .extracts_dir()
            .join(sanitize_filename(&format!("metadata_{stem}_{}.json", self.stamp)));
        write_json(&path, meta)?;
        info!(path = %path.display(), "Saved catalog metadata");
        Ok(path)
    }
}

/// Reload a record-set CSV written by [`Exporter::save_parts_csv`].
pub fn load_parts_csv(path: &Path) -> Result<Vec<Part>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    rdr.deserialize::<PartRow>()
        .map(|row| {
            row.map(Part::from)
                .with_context(|| format!("Malformed row in {}", path.display()))
        })
        .collect()
}

/// Data-quality problems of a dashboard export, one message per kind.
pub fn validate_dashboard(rows: &[DashboardRow]) -> Vec<String> {
    let mut issues = Vec::new();

    let missing_sku = rows.iter().filter(|r| r.sku.trim().is_empty()).count();
    if missing_sku > 0 {
        issues.push(format!("{missing_sku} rows missing sku"));
    }
    let missing_id = rows.iter().filter(|r| r.part_number.trim().is_empty()).count();
    if missing_id > 0 {
        issues.push(format!("{missing_id} rows missing part_number"));
    }

    let bad_prices = rows
        .iter()
        .filter(|r| r.unit_price.is_some_and(|p| p <= Decimal::ZERO))
        .count();
    if bad_prices > 0 {
        issues.push(format!("{bad_prices} rows with invalid prices"));
    }

    let mut seen = HashSet::new();
    let duplicates = rows
        .iter()
        .filter(|r| !seen.insert(r.part_number.as_str()))
        .count();
    if duplicates > 0 {
        issues.push(format!("{duplicates} duplicate part numbers"));
    }

    issues
}

/// Replace characters that are invalid in file names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

fn write_csv<T: Serialize>(
    path: &Path,
    columns: &[&str],
    rows: impl Iterator<Item = T>,
) -> Result<()> {
    // Header written by hand so an empty export still carries it.
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    wtr.write_record(columns)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
