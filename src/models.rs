use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StatusError;

/// Identifier used on error entries that apply to the whole run.
pub const RUN_SCOPE: &str = "ALL";

// ── Parts ──

/// Lifecycle of a single part through extraction and pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Extracted,
    PricePending,
    Priced,
    PriceFailed,
    Active,
    Discontinued,
}

impl PartStatus {
    pub const ALL: [PartStatus; 6] = [
        PartStatus::Extracted,
        PartStatus::PricePending,
        PartStatus::Priced,
        PartStatus::PriceFailed,
        PartStatus::Active,
        PartStatus::Discontinued,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PartStatus::Extracted => "extracted",
            PartStatus::PricePending => "price_pending",
            PartStatus::Priced => "priced",
            PartStatus::PriceFailed => "price_failed",
            PartStatus::Active => "active",
            PartStatus::Discontinued => "discontinued",
        }
    }

    /// Forward-only, except a failed lookup may be queued again.
    pub fn can_advance_to(self, next: PartStatus) -> bool {
        use PartStatus::*;
        match (self, next) {
            (Discontinued, _) => false,
            (_, Discontinued) => true,
            (Extracted, PricePending) => true,
            (PricePending, Priced | PriceFailed) => true,
            (PriceFailed, PricePending) => true,
            (Priced, Active) => true,
            _ => false,
        }
    }

    /// Whether the dashboard export should carry the part.
    pub fn is_sellable(self) -> bool {
        matches!(self, PartStatus::Priced | PartStatus::Active)
    }
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusError::Unknown(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: String,
    pub description: String,
    pub category: String,
    pub page_reference: u32,
    pub status: PartStatus,
    pub price: Option<Decimal>,
    pub last_price_update: Option<DateTime<Utc>>,
    pub source_catalog: String,
    pub vendor: String,
    pub sku: String,
    pub metadata: BTreeMap<String, String>,
}

impl Part {
    pub fn new(
        part_number: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        page_reference: u32,
    ) -> Self {
        Part {
            part_number: part_number.into(),
            description: description.into(),
            category: category.into(),
            page_reference,
            status: PartStatus::Extracted,
            price: None,
            last_price_update: None,
            source_catalog: String::new(),
            vendor: String::new(),
            sku: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Dashboard SKU, falling back to the part number.
    pub fn sku(&self) -> &str {
        if self.sku.is_empty() {
            &self.part_number
        } else {
            &self.sku
        }
    }

    pub fn is_price_stale(&self, stale_days: i64, now: DateTime<Utc>) -> bool {
        match self.last_price_update {
            None => true,
            Some(ts) => (now - ts).num_days() > stale_days,
        }
    }

    pub fn advance(&mut self, next: PartStatus) -> Result<(), StatusError> {
        if !self.status.can_advance_to(next) {
            return Err(StatusError::Illegal {
                part_number: self.part_number.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record a successful lookup.
    pub fn mark_priced(&mut self, price: Decimal, at: DateTime<Utc>) -> Result<(), StatusError> {
        self.advance(PartStatus::Priced)?;
        self.price = Some(price);
        self.last_price_update = Some(at);
        Ok(())
    }

    /// Load state carried over from an earlier run. Not a lifecycle transition:
    /// the part resumes where the previous run left it.
    pub fn restore_history(
        &mut self,
        price: Option<Decimal>,
        last_price_update: Option<DateTime<Utc>>,
        status: PartStatus,
    ) {
        self.price = price;
        self.last_price_update = last_price_update;
        self.status = status;
    }
}

/// Price state a part carried at the end of an earlier run.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownPrice {
    pub price: Option<Decimal>,
    pub last_price_update: Option<DateTime<Utc>>,
    pub status: PartStatus,
}

// ── Errors ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "pdf_parsing")]
    Parsing,
    #[serde(rename = "part_not_found")]
    NotFound,
    #[serde(rename = "network_error")]
    Network,
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "rate_limit")]
    RateLimit,
    #[serde(rename = "login_failed")]
    LoginFailure,
    #[serde(rename = "unexpected")]
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Parsing => "pdf_parsing",
            ErrorKind::NotFound => "part_not_found",
            ErrorKind::Network => "network_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::LoginFailure => "login_failed",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub part_number: String,
    pub error_type: ErrorKind,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub page_reference: u32,
}

impl ProcessingError {
    pub fn new(part_number: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        ProcessingError {
            part_number: part_number.into(),
            error_type: kind,
            error_message: message.into(),
            timestamp: Utc::now(),
            retry_count: 0,
            page_reference: 0,
        }
    }

    pub fn run_wide(kind: ErrorKind, message: impl Into<String>) -> Self {
        ProcessingError::new(RUN_SCOPE, kind, message)
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page_reference = page;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn is_run_wide(&self) -> bool {
        self.part_number == RUN_SCOPE
    }
}

// ── Catalog / session ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub filename: String,
    pub total_pages: usize,
    pub processing_date: DateTime<Utc>,
    pub total_parts: usize,
    pub successful_extractions: usize,
    pub failed_extractions: usize,
    pub catalog_version: String,
    pub catalog_date: Option<NaiveDateTime>,
}

impl CatalogMetadata {
    pub fn new(filename: impl Into<String>) -> Self {
        CatalogMetadata {
            filename: filename.into(),
            total_pages: 0,
            processing_date: Utc::now(),
            total_parts: 0,
            successful_extractions: 0,
            failed_extractions: 0,
            catalog_version: String::new(),
            catalog_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub catalog_metadata: Option<CatalogMetadata>,
    pub parts_processed: usize,
    pub prices_updated: usize,
    pub errors_count: usize,
    pub output_file: String,
}

impl ProcessingSession {
    pub fn start() -> Self {
        let start_time = Utc::now();
        ProcessingSession {
            session_id: format!("xtractor_{}", start_time.format("%Y%m%d_%H%M%S")),
            start_time,
            end_time: None,
            catalog_metadata: None,
            parts_processed: 0,
            prices_updated: 0,
            errors_count: 0,
            output_file: String::new(),
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// Seconds between start and end, `None` while the run is still open.
    pub fn duration(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}
