use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::models::{KnownPrice, Part, PartStatus, ProcessingSession};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS parts (
            part_number       TEXT PRIMARY KEY,
            description       TEXT NOT NULL DEFAULT '',
            category          TEXT NOT NULL DEFAULT '',
            source_catalog    TEXT NOT NULL DEFAULT '',
            vendor            TEXT NOT NULL DEFAULT '',
            page_reference    INTEGER NOT NULL DEFAULT 0,
            status            TEXT NOT NULL CHECK(status IN
                ('extracted','price_pending','priced','price_failed','active','discontinued')),
            price             TEXT,
            last_price_update TEXT,
            updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_parts_status ON parts(status);
        CREATE INDEX IF NOT EXISTS idx_parts_catalog ON parts(source_catalog);

        CREATE TABLE IF NOT EXISTS sessions (
            session_id      TEXT PRIMARY KEY,
            catalog         TEXT,
            start_time      TEXT NOT NULL,
            end_time        TEXT,
            parts_processed INTEGER NOT NULL DEFAULT 0,
            prices_updated  INTEGER NOT NULL DEFAULT 0,
            errors_count    INTEGER NOT NULL DEFAULT 0,
            output_file     TEXT
        );
        ",
    )?;
    Ok(())
}

// ── Price history ──

/// Upsert every part; the latest run wins.
pub fn save_parts(conn: &Connection, parts: &[Part]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO parts
             (part_number, description, category, source_catalog, vendor, page_reference,
              status, price, last_price_update, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
             ON CONFLICT(part_number) DO UPDATE SET
                description = excluded.description,
                category = excluded.category,
                source_catalog = excluded.source_catalog,
                vendor = excluded.vendor,
                page_reference = excluded.page_reference,
                status = excluded.status,
                price = excluded.price,
                last_price_update = excluded.last_price_update,
                updated_at = excluded.updated_at",
        )?;
        for p in parts {
            count += stmt.execute(rusqlite::params![
                p.part_number,
                p.description,
                p.category,
                p.source_catalog,
                p.vendor,
                p.page_reference,
                p.status.as_str(),
                p.price.map(|d| d.to_string()),
                p.last_price_update.map(|t| t.to_rfc3339()),
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Last known price state per part number.
pub fn fetch_known_prices(conn: &Connection) -> Result<HashMap<String, KnownPrice>> {
    let mut stmt = conn.prepare("SELECT part_number, status, price, last_price_update FROM parts")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut known = HashMap::with_capacity(rows.len());
    for (part_number, status, price, updated) in rows {
        let status: PartStatus = status.parse()?;
        let price = price
            .map(|p| p.parse::<Decimal>())
            .transpose()
            .with_context(|| format!("Bad stored price for {part_number}"))?;
        let last_price_update = updated
            .map(|t| DateTime::parse_from_rfc3339(&t).map(|t| t.with_timezone(&Utc)))
            .transpose()
            .with_context(|| format!("Bad stored timestamp for {part_number}"))?;
        known.insert(
            part_number,
            KnownPrice {
                price,
                last_price_update,
                status,
            },
        );
    }
    Ok(known)
}

// ── Sessions ──

pub fn save_session(conn: &Connection, session: &ProcessingSession) -> Result<()> {
    let catalog = session.catalog_metadata.as_ref().map(|m| m.filename.as_str());
    conn.execute(
        "INSERT OR REPLACE INTO sessions
         (session_id, catalog, start_time, end_time, parts_processed, prices_updated,
          errors_count, output_file)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            session.session_id,
            catalog,
            session.start_time.to_rfc3339(),
            session.end_time.map(|t| t.to_rfc3339()),
            session.parts_processed,
            session.prices_updated,
            session.errors_count,
            session.output_file,
        ],
    )?;
    Ok(())
}

pub struct SessionRow {
    pub session_id: String,
    pub catalog: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub parts_processed: usize,
    pub prices_updated: usize,
    pub errors_count: usize,
    pub output_file: String,
}

pub fn fetch_sessions(conn: &Connection, limit: usize) -> Result<Vec<SessionRow>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, COALESCE(catalog,''), start_time, end_time,
                parts_processed, prices_updated, errors_count, COALESCE(output_file,'')
         FROM sessions
         ORDER BY start_time DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok(SessionRow {
                session_id: row.get(0)?,
                catalog: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                parts_processed: row.get(4)?,
                prices_updated: row.get(5)?,
                errors_count: row.get(6)?,
                output_file: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub priced: usize,
    pub by_status: Vec<(String, usize)>,
    pub last_price_update: Option<String>,
    pub sessions: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM parts", [], |r| r.get(0))?;
    let priced: usize =
        conn.query_row("SELECT COUNT(*) FROM parts WHERE price IS NOT NULL", [], |r| r.get(0))?;
    let last_price_update: Option<String> =
        conn.query_row("SELECT MAX(last_price_update) FROM parts", [], |r| r.get(0))?;
    let sessions: usize = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM parts GROUP BY status")?;
    let counts: HashMap<String, usize> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;
    let by_status = PartStatus::ALL
        .iter()
        .map(|s| (s.to_string(), counts.get(s.as_str()).copied().unwrap_or(0)))
        .collect();

    Ok(Stats {
        total,
        priced,
        by_status,
        last_price_update,
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn priced(id: &str, cents: i64) -> Part {
        let mut p = Part::new(id, "Pump", "Pumps", 4);
        p.advance(PartStatus::PricePending).unwrap();
        p.mark_priced(Decimal::new(cents, 2), Utc::now()).unwrap();
        p
    }

    #[test]
    fn price_history_round_trip() {
        let conn = memory_db();
        let parts = vec![priced("6000-487", 12345), Part::new("A6000-123", "Filter", "", 3)];
        assert_eq!(save_parts(&conn, &parts).unwrap(), 2);

        let known = fetch_known_prices(&conn).unwrap();
        let pump = &known["6000-487"];
        assert_eq!(pump.status, PartStatus::Priced);
        assert_eq!(pump.price, Some(Decimal::new(12345, 2)));
        assert_eq!(
            pump.last_price_update.map(|t| t.timestamp()),
            parts[0].last_price_update.map(|t| t.timestamp())
        );
        let filter = &known["A6000-123"];
        assert_eq!(filter.status, PartStatus::Extracted);
        assert!(filter.price.is_none());
    }

    #[test]
    fn upsert_keeps_one_row_per_part() {
        let conn = memory_db();
        save_parts(&conn, &[Part::new("6000-487", "Pump", "", 1)]).unwrap();
        save_parts(&conn, &[priced("6000-487", 999)]).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.priced, 1);
        assert!(stats.last_price_update.is_some());
        let priced_count = stats
            .by_status
            .iter()
            .find(|(s, _)| s == "priced")
            .map(|(_, n)| *n);
        assert_eq!(priced_count, Some(1));
        assert_eq!(stats.by_status.len(), 6);
    }

    #[test]
    fn sessions_newest_first() {
        let conn = memory_db();
        let mut first = ProcessingSession::start();
        first.session_id = "xtractor_20240101_000000".into();
        first.start_time = Utc::now() - chrono::Duration::hours(1);
        first.finish();
        let mut second = ProcessingSession::start();
        second.session_id = "xtractor_20240101_010000".into();
        second.parts_processed = 42;

        save_session(&conn, &first).unwrap();
        save_session(&conn, &second).unwrap();

        let rows = fetch_sessions(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_id, "xtractor_20240101_010000");
        assert_eq!(rows[0].parts_processed, 42);
        assert!(rows[0].end_time.is_none());
        assert!(rows[1].end_time.is_some());
        assert_eq!(fetch_sessions(&conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn connect_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/xtractor.sqlite");
        let conn = connect(&path).unwrap();
        init_schema(&conn).unwrap();
        assert!(path.exists());
    }
}
