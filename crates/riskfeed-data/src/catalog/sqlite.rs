//! SQLite catalog of imported releases and extracted fundamentals.

use crate::error::{DataError, Result};
use crate::release::{FileFormat, TableKind};
use crate::xbrl::{FundamentalItem, PeriodType, pad_cik};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One table file of an imported release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    /// Table kind
    pub kind: TableKind,
    /// File format
    pub format: FileFormat,
    /// File name inside the release directory
    pub file_name: String,
    /// Number of data rows
    pub rows: usize,
}

/// An imported release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Release date
    pub date: NaiveDate,
    /// Directory the release was imported from
    pub source: String,
    /// Directory the release was copied to
    pub destination: String,
    /// When the import finished
    pub imported_at: DateTime<Utc>,
    /// Tables in the release
    pub tables: Vec<TableRecord>,
}

/// Catalog statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    /// Number of recorded releases
    pub releases: usize,
    /// Number of stored fundamental items
    pub fundamental_items: usize,
    /// Number of distinct companies with fundamentals
    pub companies: usize,
}

/// SQLite-backed catalog.
#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
}

fn conversion_error<E>(column: usize) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn parse_db_date(raw: &str, column: usize) -> std::result::Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(conversion_error(column))
}

fn item_from_row(row: &Row<'_>) -> std::result::Result<FundamentalItem, rusqlite::Error> {
    Ok(FundamentalItem {
        cik: row.get(0)?,
        gvkey: row.get(1)?,
        item: row.get(2)?,
        value: row.get(3)?,
        period_type: PeriodType::from_db_str(&row.get::<_, String>(4)?)
            .map_err(conversion_error(4))?,
        fiscal_year: row.get(5)?,
        fiscal_period: row.get(6)?,
        period_end: parse_db_date(&row.get::<_, String>(7)?, 7)?,
        concept: row.get(8)?,
        unit: row.get(9)?,
        form: row.get(10)?,
        filed: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_db_date(&s, 11))
            .transpose()?,
    })
}

impl Catalog {
    /// Open (or create) a catalog database file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let catalog = Self { conn };
        catalog.initialize_schema()?;
        Ok(catalog)
    }

    /// Create an in-memory catalog (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let catalog = Self { conn };
        catalog.initialize_schema()?;
        Ok(catalog)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS releases (
                date TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                imported_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS release_tables (
                release_date TEXT NOT NULL,
                table_name TEXT NOT NULL,
                format TEXT NOT NULL,
                file_name TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                PRIMARY KEY (release_date, table_name, format),
                FOREIGN KEY (release_date) REFERENCES releases(date) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS fundamental_items (
                cik TEXT NOT NULL,
                gvkey TEXT,
                item TEXT NOT NULL,
                value REAL NOT NULL,
                period_type TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                fiscal_period TEXT NOT NULL,
                period_end TEXT NOT NULL,
                concept TEXT NOT NULL,
                unit TEXT NOT NULL,
                form TEXT,
                filed TEXT,
                PRIMARY KEY (cik, item, period_type, period_end)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_cik_year ON fundamental_items(cik, fiscal_year)",
            [],
        )?;

        Ok(())
    }

    /// Record an imported release, replacing any earlier record for the same date.
    pub fn record_release(&self, record: &ReleaseRecord) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let date = record.date.to_string();

        tx.execute(
            "DELETE FROM release_tables WHERE release_date = ?1",
            params![date],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO releases (date, source, destination, imported_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                date,
                record.source,
                record.destination,
                record.imported_at.to_rfc3339()
            ],
        )?;

        for table in &record.tables {
            tx.execute(
                "INSERT OR REPLACE INTO release_tables
                    (release_date, table_name, format, file_name, row_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    date,
                    table.kind.file_stem(),
                    table.format.extension(),
                    table.file_name,
                    table.rows as i64
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn tables_for(&self, date: &str) -> Result<Vec<TableRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, format, file_name, row_count
             FROM release_tables
             WHERE release_date = ?1
             ORDER BY table_name, format",
        )?;

        let rows = stmt.query_map(params![date], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut tables = Vec::new();
        for row in rows {
            let (stem, ext, file_name, count) = row?;
            let kind = TableKind::from_stem(&stem)
                .ok_or_else(|| DataError::Parse(format!("Unknown table in catalog: {}", stem)))?;
            let format = FileFormat::from_extension(&ext)
                .ok_or_else(|| DataError::Parse(format!("Unknown format in catalog: {}", ext)))?;
            tables.push(TableRecord {
                kind,
                format,
                file_name,
                rows: count.max(0) as usize,
            });
        }
        Ok(tables)
    }

    fn release_from_parts(
        &self,
        (date, source, destination, imported_at): (String, String, String, String),
    ) -> Result<ReleaseRecord> {
        let tables = self.tables_for(&date)?;
        Ok(ReleaseRecord {
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| DataError::Parse(format!("Invalid release date '{}': {}", date, e)))?,
            source,
            destination,
            imported_at: DateTime::parse_from_rfc3339(&imported_at)
                .map_err(|e| DataError::Parse(format!("Invalid timestamp '{}': {}", imported_at, e)))?
                .with_timezone(&Utc),
            tables,
        })
    }

    /// All recorded releases, oldest first.
    pub fn releases(&self) -> Result<Vec<ReleaseRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, source, destination, imported_at FROM releases ORDER BY date",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

        let mut parts = Vec::new();
        for row in rows {
            parts.push(row?);
        }
        parts
            .into_iter()
            .map(|p| self.release_from_parts(p))
            .collect()
    }

    /// The most recent recorded release.
    pub fn latest_release(&self) -> Result<Option<ReleaseRecord>> {
        let parts = self
            .conn
            .query_row(
                "SELECT date, source, destination, imported_at
                 FROM releases ORDER BY date DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        parts.map(|p| self.release_from_parts(p)).transpose()
    }

    /// Whether a release date has been recorded.
    pub fn has_release(&self, date: NaiveDate) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM releases WHERE date = ?1",
            params![date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Store fundamental items in a batch. Existing values for the same
    /// (cik, item, period type, period end) are replaced.
    pub fn put_items(&self, items: &[FundamentalItem]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        for item in items {
            tx.execute(
                "INSERT OR REPLACE INTO fundamental_items (
                    cik, gvkey, item, value, period_type, fiscal_year, fiscal_period,
                    period_end, concept, unit, form, filed
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    pad_cik(&item.cik),
                    item.gvkey,
                    item.item,
                    item.value,
                    item.period_type.to_db_str(),
                    item.fiscal_year,
                    item.fiscal_period,
                    item.period_end.to_string(),
                    item.concept,
                    item.unit,
                    item.form,
                    item.filed.map(|d| d.to_string()),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fundamental items for a company (CIK padded or not), optionally
    /// restricted to one fiscal year.
    pub fn get_items(&self, cik: &str, fiscal_year: Option<i32>) -> Result<Vec<FundamentalItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT cik, gvkey, item, value, period_type, fiscal_year, fiscal_period,
                    period_end, concept, unit, form, filed
             FROM fundamental_items
             WHERE cik = ?1 AND (?2 IS NULL OR fiscal_year = ?2)
             ORDER BY period_end, item",
        )?;

        let rows = stmt.query_map(params![pad_cik(cik), fiscal_year], item_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Catalog statistics.
    pub fn get_stats(&self) -> Result<CatalogStats> {
        let releases: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM releases", [], |row| row.get(0))?;
        let items: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM fundamental_items", [], |row| {
                    row.get(0)
                })?;
        let companies: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT cik) FROM fundamental_items",
            [],
            |row| row.get(0),
        )?;

        Ok(CatalogStats {
            releases: releases as usize,
            fundamental_items: items as usize,
            companies: companies as usize,
        })
    }
}
