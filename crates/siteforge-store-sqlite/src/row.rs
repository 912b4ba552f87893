//! Column decoding helpers shared by the SQLite stores

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use siteforge_core::{Error, Result};

pub(crate) fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

pub(crate) fn text(row: &SqliteRow, column: &str) -> Result<String> {
    row.try_get::<String, _>(column).map_err(db_error)
}

pub(crate) fn uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw = text(row, column)?;
    Uuid::parse_str(&raw)
        .map_err(|e| Error::Database(format!("Corrupt {} value {:?}: {}", column, raw, e)))
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw = text(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("Corrupt {} value {:?}: {}", column, raw, e)))
}

pub(crate) fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
