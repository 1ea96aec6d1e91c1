//! Per-engine SQL dispatch.
//!
//! The store speaks three engine families through one operation set.
//! Every piece of SQL that differs between them is produced here, so
//! business logic never branches on the engine: placeholder style, key
//! column types, row-lock suffixes, catalog probes, insert-if-absent.

use crate::error::{Result, StoreError};

/// The engine family behind a connection URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded file-based engine.
    Sqlite,
    /// PostgreSQL client/server engine.
    Postgres,
    /// MySQL client/server engine.
    MySql,
}

impl Dialect {
    /// Derive the dialect from a connection URL's scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            other => Err(StoreError::Config(format!(
                "unsupported backend scheme {other:?} (expected sqlite, postgres, or mysql)"
            ))),
        }
    }

    /// Rewrite `?` placeholders into the engine's native form.
    ///
    /// The store's SQL never contains a literal `?` inside a string, so a
    /// character scan is sufficient.
    pub fn sql(self, sql: &str) -> String {
        match self {
            Self::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut n = 0;
                for ch in sql.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
            Self::Sqlite | Self::MySql => sql.to_owned(),
        }
    }

    /// Row-lock suffix for a `SELECT` inside a transaction. SQLite has no
    /// row locks; its single-writer database lock covers the same need.
    pub fn for_update(self) -> &'static str {
        match self {
            Self::Sqlite => "",
            Self::Postgres | Self::MySql => " FOR UPDATE",
        }
    }

    /// Column type for key columns. MySQL cannot index an unbounded TEXT
    /// column, so keys there are bounded VARCHARs.
    pub fn key_type(self) -> &'static str {
        match self {
            Self::MySql => "VARCHAR(128)",
            Self::Sqlite | Self::Postgres => "TEXT",
        }
    }

    /// Column type for persisted timestamps (fixed-width RFC 3339 text).
    pub fn timestamp_type(self) -> &'static str {
        match self {
            Self::MySql => "VARCHAR(32)",
            Self::Sqlite | Self::Postgres => "TEXT",
        }
    }

    /// Probe: does a table exist? One bind — the table name. Run through
    /// [`Dialect::sql`] like any other statement.
    pub fn table_exists_sql(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            Self::Postgres => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = ?"
            }
            Self::MySql => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
        }
    }

    /// Probe: list a table's column names. One bind — the table name.
    pub fn columns_sql(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT name FROM pragma_table_info(?)",
            Self::Postgres => {
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = ?"
            }
            Self::MySql => {
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
        }
    }

    /// Turn a plain `INSERT` into an insert-if-absent. Used to materialize
    /// single-row state records so there is always a row to lock.
    pub fn insert_ignore(self, insert: &str) -> String {
        match self {
            Self::Sqlite | Self::Postgres => format!("{insert} ON CONFLICT DO NOTHING"),
            Self::MySql => insert.replacen("INSERT ", "INSERT IGNORE ", 1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
