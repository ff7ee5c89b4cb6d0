use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

const ENV_PREFIX: &str = "XTRACTOR";
const DEFAULT_CONFIG_FILE: &str = "xtractor.toml";

/// Run-wide settings. Built once at startup and handed to each component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub extraction: ExtractionConfig,
    pub pricing: PricingConfig,
    pub output: OutputConfig,
}

impl Settings {
    /// Defaults, then the optional config file, then `XTRACTOR__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load settings from {}", file.display()))?;
        settings
            .try_deserialize()
            .context("Invalid xtractor settings")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Searched independently over page text, in priority order.
    pub identifier_patterns: Vec<String>,
    /// A candidate is accepted when it fully matches any of these.
    pub acceptance_patterns: Vec<String>,
    pub min_identifier_len: usize,
    pub max_identifier_len: usize,
    pub identifier_keywords: Vec<String>,
    pub description_keywords: Vec<String>,
    /// Product-type keywords first, department keywords second.
    pub category_patterns: Vec<String>,
    pub category_scan_lines: usize,
    pub page_categories: Vec<PageRange>,
    pub fallback_category: String,
    pub description_window: usize,
    pub description_min_len: usize,
    pub description_max_len: usize,
    pub progress_interval: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageRange {
    /// Exclusive upper page bound.
    pub below: u32,
    pub category: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let range = |below, category: &str| PageRange {
            below,
            category: category.to_string(),
        };
        ExtractionConfig {
            identifier_patterns: strings(&[
                r"\b\d{4}-\d{3}\b",
                r"\b\d{4}-\d{2}\b",
                r"\b[A-Z]\d{4}-\d{3}\b",
            ]),
            acceptance_patterns: strings(&[
                r"^\d{4}-\d{3}$",
                r"^\d{4}-\d{2}$",
                r"^[A-Z]\d{4}-\d{3}$",
            ]),
            min_identifier_len: 7,
            max_identifier_len: 15,
            identifier_keywords: strings(&["part", "number", "item", "sku", "code"]),
            description_keywords: strings(&["description", "desc", "name", "title"]),
            category_patterns: strings(&[
                r"(?i)(pumps?|motor|controller|heater|filter|jet|light|cover|spa|tub)",
                r"(?i)(electrical|plumbing|hardware|accessory|part)",
            ]),
            category_scan_lines: 10,
            page_categories: vec![
                range(50, "Accessories"),
                range(100, "Pumps & Motors"),
                range(150, "Electrical"),
                range(200, "Plumbing"),
            ],
            fallback_category: "Hardware".to_string(),
            description_window: 200,
            description_min_len: 6,
            description_max_len: 100,
            progress_interval: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Credential store key of the ordering portal.
    pub site_name: String,
    pub vendor: String,
    pub webdriver_url: String,
    pub browser_args: Vec<String>,
    pub chunk_size: usize,
    pub request_delay_ms: u64,
    pub chunk_delay_ms: u64,
    pub login_wait_secs: u64,
    pub login_settle_ms: u64,
    pub navigation_wait_secs: u64,
    pub result_wait_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub stale_days: i64,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            site_name: "Jacuzzi Dealer".to_string(),
            vendor: "Jacuzzi".to_string(),
            webdriver_url: "http://localhost:9515".to_string(),
            browser_args: [
                "--headless",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--window-size=1920,1080",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            chunk_size: 10,
            request_delay_ms: 2000,
            chunk_delay_ms: 4000,
            login_wait_secs: 15,
            login_settle_ms: 3000,
            navigation_wait_secs: 15,
            result_wait_secs: 10,
            max_retries: 3,
            backoff_base_ms: 2000,
            stale_days: 7,
            min_price: Decimal::new(1, 2),
            max_price: Decimal::new(10_000, 0),
        }
    }
}

impl PricingConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_secs)
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_millis(self.login_settle_ms)
    }

    pub fn navigation_wait(&self) -> Duration {
        Duration::from_secs(self.navigation_wait_secs)
    }

    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub credentials_file: PathBuf,
    pub dashboard_description_len: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            data_dir: PathBuf::from("data"),
            database: PathBuf::from("data/xtractor.sqlite"),
            credentials_file: PathBuf::from("creden.json"),
            dashboard_description_len: 200,
        }
    }
}

impl OutputConfig {
    pub fn extracts_dir(&self) -> PathBuf {
        self.data_dir.join("extracts")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.data_dir.join("errors")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_catalog_conventions() {
        let s = Settings::default();
        assert_eq!(s.extraction.identifier_patterns.len(), 3);
        assert_eq!(s.extraction.min_identifier_len, 7);
        assert_eq!(s.pricing.chunk_size, 10);
        assert_eq!(s.pricing.backoff(0), Duration::from_millis(2000));
        assert_eq!(s.pricing.backoff(2), Duration::from_millis(8000));
        assert_eq!(s.output.errors_dir(), PathBuf::from("data/errors"));
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("nope.toml");
        assert!(Settings::load(Some(&absent)).is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xtractor.toml");
        std::fs::write(
            &path,
            "[pricing]\nchunk_size = 5\nvendor = \"Sundance\"\n\n[extraction]\nprogress_interval = 10\n",
        )
        .unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.pricing.chunk_size, 5);
        assert_eq!(s.pricing.vendor, "Sundance");
        assert_eq!(s.pricing.request_delay_ms, 2000);
        assert_eq!(s.extraction.progress_interval, 10);
        assert_eq!(s.extraction.min_identifier_len, 7);
    }
}
