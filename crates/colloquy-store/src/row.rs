//! Row decode helpers.
//!
//! Every failure carries the table and column it came from, so corrupt
//! rows surface as actionable `Serialization` errors instead of bare
//! driver messages.

use chrono::{DateTime, Utc};
use colloquy_core::state::StateMap;
use colloquy_core::time;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::error::{Result, StoreError};

/// Get a column value from a row.
pub fn get<'r, T>(row: &'r AnyRow, table: &'static str, column: &'static str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{table}.{column}: {e}")))
}

/// Parse a JSON state column.
pub fn parse_state(raw: &str, table: &'static str, column: &'static str) -> Result<StateMap> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Serialization(format!("{table}.{column}: invalid JSON: {e}")))
}

/// Parse a persisted timestamp column.
pub fn parse_ts(raw: &str, table: &'static str, column: &'static str) -> Result<DateTime<Utc>> {
    time::parse(raw)
        .map_err(|e| StoreError::Serialization(format!("{table}.{column}: invalid timestamp: {e}")))
}

/// Map a nullable integer flag column to a tri-state bool.
pub fn flag(value: Option<i64>) -> Option<bool> {
    value.map(|v| v != 0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
