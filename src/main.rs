mod aggregate;
mod config;
mod db;
mod document;
mod error;
mod export;
mod extract;
mod models;
mod pricing;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::export::Exporter;
use crate::extract::{Extraction, ExtractionPipeline};
use crate::models::{ErrorKind, ProcessingError, ProcessingSession};
use crate::pricing::{CredentialStore, WebDriverLauncher};

#[derive(Parser)]
#[command(name = "xtractor", about = "Parts catalog extraction and portal price enrichment")]
struct Cli {
    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, global = true, default_value = "info",
          value_parser = ["debug", "info", "warn", "error"])]
    log_level: String,
    /// Settings file (default: ./xtractor.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a catalog, fetch prices and write all outputs
    Run {
        /// Catalog PDF
        catalog: PathBuf,
        /// Skip the price lookup phase
        #[arg(long)]
        no_prices: bool,
        /// Re-fetch prices even when they are still fresh
        #[arg(long)]
        force_refresh: bool,
    },
    /// Extract a catalog without fetching prices
    Extract {
        /// Catalog PDF
        catalog: PathBuf,
    },
    /// Price coverage from the price history
    Stats,
    /// Recent processing sessions
    History {
        /// Max sessions to display
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

struct RunOptions {
    fetch_prices: bool,
    force_refresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let t0 = Instant::now();
    let settings = Settings::load(cli.config.as_deref())?;

    let ok = match cli.command {
        Commands::Run {
            catalog,
            no_prices,
            force_refresh,
        } => {
            let opts = RunOptions {
                fetch_prices: !no_prices,
                force_refresh,
            };
            run(&settings, &catalog, opts).await?
        }
        Commands::Extract { catalog } => {
            let opts = RunOptions {
                fetch_prices: false,
                force_refresh: false,
            };
            run(&settings, &catalog, opts).await?
        }
        Commands::Stats => {
            let conn = db::connect(&settings.output.database)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            let coverage = if s.total > 0 {
                s.priced as f64 / s.total as f64 * 100.0
            } else {
                0.0
            };
            println!("Parts:        {}", s.total);
            println!("With prices:  {} ({:.1}%)", s.priced, coverage);
            for (status, count) in &s.by_status {
                println!("  {:<14} {}", status, count);
            }
            println!(
                "Last update:  {}",
                s.last_price_update.as_deref().unwrap_or("-")
            );
            println!("Sessions:     {}", s.sessions);
            true
        }
        Commands::History { limit } => {
            let conn = db::connect(&settings.output.database)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_sessions(&conn, limit)?;
            if rows.is_empty() {
                println!("No sessions recorded. Run 'run <catalog>' first.");
                return Ok(());
            }

            println!(
                "{:<26} | {:<24} | {:<20} | {:>6} | {:>6} | {:>6}",
                "Session", "Catalog", "Started", "Parts", "Prices", "Errors"
            );
            println!("{}", "-".repeat(102));
            for r in &rows {
                let started: String = r.start_time.chars().take(19).collect();
                let status = if r.end_time.is_some() { "" } else { " (open)" };
                println!(
                    "{:<26} | {:<24} | {:<20} | {:>6} | {:>6} | {:>6}{}",
                    truncate(&r.session_id, 26),
                    truncate(&r.catalog, 24),
                    started,
                    r.parts_processed,
                    r.prices_updated,
                    r.errors_count,
                    status
                );
            }
            if let Some(latest) = rows.first().filter(|r| !r.output_file.is_empty()) {
                println!("\nLatest output: {}", latest.output_file);
            }
            true
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Full workflow for one catalog. Returns whether the run succeeded: at least
/// one part extracted and no run-wide failure.
async fn run(settings: &Settings, catalog: &Path, opts: RunOptions) -> Result<bool> {
    check_catalog(catalog)?;
    let pipeline = ExtractionPipeline::new(&settings.extraction, &settings.pricing.vendor)
        .context("Invalid extraction pattern in settings")?;
    let conn = db::connect(&settings.output.database)?;
    db::init_schema(&conn)?;

    let mut session = ProcessingSession::start();
    info!(session = %session.session_id, catalog = %catalog.display(), "Starting processing session");
    let exporter = Exporter::new(&settings.output, &session.session_id)?;

    let mut errors = Vec::new();
    let ok = match process(settings, &pipeline, &conn, &exporter, catalog, &opts, &mut session, &mut errors).await {
        Ok(ok) => ok,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Processing failed");
            errors.push(ProcessingError::run_wide(ErrorKind::Unexpected, format!("{e:#}")));
            false
        }
    };

    session.errors_count = errors.len();
    session.finish();
    record_run(&exporter, &conn, &session, &errors);
    print_summary(&session);

    Ok(ok)
}

/// Error log, session JSON and session row. A failed write is logged and the
/// rest still happen. Returns the number of failed writes.
fn record_run(
    exporter: &Exporter<'_>,
    conn: &rusqlite::Connection,
    session: &ProcessingSession,
    errors: &[ProcessingError],
) -> usize {
    let mut failed = 0;
    if !errors.is_empty() {
        if let Err(e) = exporter.save_errors(errors) {
            warn!(error = %format!("{e:#}"), "Could not write error log");
            failed += 1;
        }
    }
    if let Err(e) = exporter.save_session(session) {
        warn!(error = %format!("{e:#}"), "Could not write session file");
        failed += 1;
    }
    if let Err(e) = db::save_session(conn, session) {
        warn!(error = %format!("{e:#}"), "Could not record session");
        failed += 1;
    }
    failed
}

#[allow(clippy::too_many_arguments)]
async fn process(
    settings: &Settings,
    pipeline: &ExtractionPipeline,
    conn: &rusqlite::Connection,
    exporter: &Exporter<'_>,
    catalog: &Path,
    opts: &RunOptions,
    session: &mut ProcessingSession,
    errors: &mut Vec<ProcessingError>,
) -> Result<bool> {
    // Phase 1: Extract
    let t_extract = Instant::now();
    let Extraction {
        mut parts,
        metadata,
        errors: page_errors,
    } = match pipeline.extract_catalog(catalog) {
        Ok(x) => x,
        Err(failure) => {
            error!(error = %failure, "Extraction failed");
            errors.push(failure.error_record());
            session.catalog_metadata = Some(failure.metadata);
            return Ok(false);
        }
    };
    info!(
        parts = parts.len(),
        page_errors = page_errors.len(),
        elapsed = %format_duration(t_extract.elapsed()),
        "Extraction finished"
    );
    errors.extend(page_errors);
    exporter.save_catalog_metadata(&metadata)?;
    session.catalog_metadata = Some(metadata);
    session.parts_processed = parts.len();

    if parts.is_empty() {
        warn!("No parts extracted from catalog");
        return Ok(false);
    }

    let history = db::fetch_known_prices(conn)?;
    pricing::apply_history(
        &mut parts,
        &history,
        &settings.pricing,
        opts.fetch_prices,
        opts.force_refresh,
        Utc::now(),
    );

    // Phase 2: Prices
    let mut fatal = false;
    if opts.fetch_prices {
        let t_prices = Instant::now();
        let selected = pricing::select_for_pricing(&parts);
        let credentials = load_credentials(&settings.output.credentials_file);
        let launcher = WebDriverLauncher::new(&settings.pricing)?;
        let report = pricing::fetch_prices(&launcher, &settings.pricing, &credentials, selected).await;

        info!(
            priced = report.priced,
            errors = report.errors.len(),
            elapsed = %format_duration(t_prices.elapsed()),
            "Price phase finished"
        );
        session.prices_updated = report.priced;
        fatal = report.fatal.is_some();
        errors.extend(report.errors);
        parts = aggregate::merge(parts, report.parts);
    } else {
        info!("Price fetching disabled");
    }

    // Phase 3: Outputs
    let stats = aggregate::statistics(&parts);
    info!(
        total = stats.total_parts,
        priced = stats.parts_with_prices,
        coverage = %format!("{:.1}%", stats.price_coverage),
        avg_price = %stats
            .price_statistics
            .as_ref()
            .map(|p| p.avg_price.round_dp(2).to_string())
            .unwrap_or_else(|| "-".into()),
        "Run statistics"
    );
    let csv = exporter.save_parts_csv(&parts)?;
    exporter.save_parts_json(&parts)?;
    exporter.save_dashboard_csv(&parts)?;
    exporter.save_backup(&parts, &stats)?;
    session.output_file = csv.display().to_string();

    let saved = db::save_parts(conn, &parts)?;
    debug!(saved, "Price history updated");

    Ok(!fatal)
}

fn check_catalog(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Catalog not found: {}", path.display());
    }
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        bail!("Catalog must be a PDF file: {}", path.display());
    }
    Ok(())
}

/// A missing or unreadable store is not fatal here; the price phase reports
/// the missing site instead.
fn load_credentials(path: &Path) -> CredentialStore {
    match CredentialStore::load(path) {
        Ok(store) => {
            debug!(sites = store.len(), "Loaded credentials");
            store
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "No usable credentials");
            CredentialStore::default()
        }
    }
}

fn print_summary(session: &ProcessingSession) {
    let duration = session
        .duration()
        .map(|secs| format_duration(Duration::from_secs_f64(secs.max(0.0))))
        .unwrap_or_else(|| "-".into());
    let output = if session.output_file.is_empty() {
        "-"
    } else {
        session.output_file.as_str()
    };

    println!("\n--- Processing summary ---");
    println!("Session:         {}", session.session_id);
    println!("Parts processed: {}", session.parts_processed);
    println!("Prices updated:  {}", session.prices_updated);
    println!("Errors:          {}", session.errors_count);
    println!("Output file:     {}", output);
    println!("Duration:        {}", duration);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
