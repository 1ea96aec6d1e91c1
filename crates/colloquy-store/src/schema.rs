//! Schema detection and bootstrap.
//!
//! Two incompatible on-disk layouts exist side by side in the wild:
//!
//! - **Modern**: events stored as one JSON document beside the key
//!   columns, with a `schema_metadata` marker table.
//! - **Legacy**: events spread over wide typed columns, with the action
//!   payload in a closed binary encoding. No marker table.
//!
//! Detection runs once per store instance: trust the marker table when it
//! exists, otherwise classify the event table's column set. A virgin
//! backend is bootstrapped with the modern layout. Anything else is a
//! schema mismatch — the store refuses to touch a layout it does not
//! recognize, and never converts between the two.

use std::fmt;

use sqlx::AnyConnection;
use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::error::{Result, StoreError};
use crate::pool::StorePool;

/// Marker key in the `schema_metadata` table.
const VERSION_KEY: &str = "schema_version";

/// The on-disk layout a backend was initialized with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Wide-column event table with an opaque binary action payload.
    Legacy,
    /// Single-JSON-column event table plus a version marker table.
    Modern,
}

impl SchemaVersion {
    /// Marker value persisted in the metadata table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Modern => "modern",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the backend's layout, bootstrapping a fresh modern schema on a
/// virgin backend. Returns the tag the store must thread through every
/// serializer and event-log call.
pub async fn detect_or_initialize(pool: &StorePool) -> Result<SchemaVersion> {
    let dialect = pool.dialect();
    let mut conn = pool.acquire().await?;

    if table_exists(&mut conn, dialect, "schema_metadata").await? {
        if let Some(marker) = read_marker(&mut conn, dialect).await? {
            return match marker.as_str() {
                "modern" => {
                    debug!("version marker present: modern");
                    Ok(SchemaVersion::Modern)
                }
                "legacy" => {
                    debug!("version marker present: legacy");
                    Ok(SchemaVersion::Legacy)
                }
                other => Err(StoreError::SchemaMismatch(format!(
                    "unrecognized schema version marker {other:?}"
                ))),
            };
        }
        // Marker table without a row: fall through to column inspection.
    }

    if table_exists(&mut conn, dialect, "events").await? {
        let columns = column_names(&mut conn, dialect, "events").await?;
        let version = classify_event_columns(&columns).ok_or_else(|| {
            StoreError::SchemaMismatch(format!(
                "event table matches neither known layout (columns: {})",
                columns.join(", ")
            ))
        })?;
        debug!(%version, "classified existing event table");
        if version == SchemaVersion::Modern {
            // A modern layout always carries its marker; repair if missing.
            ensure_marker(&mut conn, dialect).await?;
        }
        return Ok(version);
    }

    if table_exists(&mut conn, dialect, "sessions").await? {
        return Err(StoreError::SchemaMismatch(
            "found a sessions table but no event table; refusing a foreign schema".into(),
        ));
    }

    bootstrap(&mut conn, dialect).await?;
    info!("initialized fresh backend with the modern layout");
    Ok(SchemaVersion::Modern)
}

/// Wide layouts carry per-field columns; the modern layout stores one
/// payload document.
fn classify_event_columns(columns: &[String]) -> Option<SchemaVersion> {
    let has = |name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));
    if has("invocation_id") && has("actions") {
        Some(SchemaVersion::Legacy)
    } else if has("payload") {
        Some(SchemaVersion::Modern)
    } else {
        None
    }
}

async fn table_exists(conn: &mut AnyConnection, dialect: Dialect, table: &str) -> Result<bool> {
    let sql = dialect.sql(dialect.table_exists_sql());
    let row = sqlx::query(&sql).bind(table).fetch_optional(&mut *conn).await?;
    Ok(row.is_some())
}

async fn column_names(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<Vec<String>> {
    use sqlx::Row;
    let sql = dialect.sql(dialect.columns_sql());
    let rows = sqlx::query(&sql).bind(table).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| {
            row.try_get::<String, _>(0)
                .map_err(|e| StoreError::Serialization(format!("column probe: {e}")))
        })
        .collect()
}

async fn read_marker(conn: &mut AnyConnection, dialect: Dialect) -> Result<Option<String>> {
    use sqlx::Row;
    let sql = dialect.sql("SELECT meta_value FROM schema_metadata WHERE meta_key = ?");
    let row = sqlx::query(&sql)
        .bind(VERSION_KEY)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| {
        r.try_get::<String, _>(0)
            .map_err(|e| StoreError::Serialization(format!("schema_metadata.meta_value: {e}")))
    })
    .transpose()
}

async fn ensure_marker(conn: &mut AnyConnection, dialect: Dialect) -> Result<()> {
    let _ = sqlx::query(&metadata_ddl(dialect)).execute(&mut *conn).await?;
    let insert = dialect.insert_ignore(
        "INSERT INTO schema_metadata (meta_key, meta_value) VALUES (?, ?)",
    );
    let _ = sqlx::query(&dialect.sql(&insert))
        .bind(VERSION_KEY)
        .bind(SchemaVersion::Modern.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn bootstrap(conn: &mut AnyConnection, dialect: Dialect) -> Result<()> {
    for statement in modern_ddl(dialect) {
        let _ = sqlx::query(&statement).execute(&mut *conn).await?;
    }
    ensure_marker(conn, dialect).await
}

fn metadata_ddl(dialect: Dialect) -> String {
    let key = dialect.key_type();
    format!(
        "CREATE TABLE IF NOT EXISTS schema_metadata (\
           meta_key {key} NOT NULL, \
           meta_value TEXT NOT NULL, \
           PRIMARY KEY (meta_key))"
    )
}

/// DDL for the modern layout. `IF NOT EXISTS` everywhere keeps bootstrap
/// idempotent even when a previous run was interrupted mid-way.
fn modern_ddl(dialect: Dialect) -> Vec<String> {
    let key = dialect.key_type();
    let ts = dialect.timestamp_type();
    let mut ddl = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS sessions (\
               app_name {key} NOT NULL, \
               user_id {key} NOT NULL, \
               id {key} NOT NULL, \
               state TEXT NOT NULL, \
               create_time {ts} NOT NULL, \
               update_time {ts} NOT NULL, \
               PRIMARY KEY (app_name, user_id, id))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS app_states (\
               app_name {key} NOT NULL, \
               state TEXT NOT NULL, \
               update_time {ts} NOT NULL, \
               PRIMARY KEY (app_name))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS user_states (\
               app_name {key} NOT NULL, \
               user_id {key} NOT NULL, \
               state TEXT NOT NULL, \
               update_time {ts} NOT NULL, \
               PRIMARY KEY (app_name, user_id))"
        ),
    ];

    // MySQL has no CREATE INDEX IF NOT EXISTS, so the event index is
    // declared inline there and separately elsewhere.
    let index_columns = "(app_name, user_id, session_id, timestamp, seq)";
    match dialect {
        Dialect::MySql => ddl.push(format!(
            "CREATE TABLE IF NOT EXISTS events (\
               id {key} NOT NULL, \
               app_name {key} NOT NULL, \
               user_id {key} NOT NULL, \
               session_id {key} NOT NULL, \
               timestamp {ts} NOT NULL, \
               seq BIGINT NOT NULL, \
               payload TEXT NOT NULL, \
               PRIMARY KEY (id, app_name, user_id, session_id), \
               INDEX idx_events_session {index_columns}, \
               FOREIGN KEY (app_name, user_id, session_id) \
                 REFERENCES sessions (app_name, user_id, id) ON DELETE CASCADE)"
        )),
        Dialect::Sqlite | Dialect::Postgres => {
            ddl.push(format!(
                "CREATE TABLE IF NOT EXISTS events (\
                   id {key} NOT NULL, \
                   app_name {key} NOT NULL, \
                   user_id {key} NOT NULL, \
                   session_id {key} NOT NULL, \
                   timestamp {ts} NOT NULL, \
                   seq BIGINT NOT NULL, \
                   payload TEXT NOT NULL, \
                   PRIMARY KEY (id, app_name, user_id, session_id), \
                   FOREIGN KEY (app_name, user_id, session_id) \
                     REFERENCES sessions (app_name, user_id, id) ON DELETE CASCADE)"
            ));
            ddl.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_events_session ON events {index_columns}"
            ));
        }
    }

    ddl
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use assert_matches::assert_matches;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn classify_wide_layout_as_legacy() {
        let columns = strings(&[
            "id",
            "app_name",
            "user_id",
            "session_id",
            "invocation_id",
            "author",
            "branch",
            "timestamp",
            "content",
            "actions",
            "partial",
            "turn_complete",
        ]);
        assert_eq!(classify_event_columns(&columns), Some(SchemaVersion::Legacy));
    }

    #[test]
    fn classify_narrow_layout_as_modern() {
        let columns = strings(&[
            "id",
            "app_name",
            "user_id",
            "session_id",
            "timestamp",
            "seq",
            "payload",
        ]);
        assert_eq!(classify_event_columns(&columns), Some(SchemaVersion::Modern));
    }

    #[test]
    fn classify_foreign_layout_as_none() {
        let columns = strings(&["id", "kind", "body"]);
        assert_eq!(classify_event_columns(&columns), None);
    }

    fn config_for(dir: &tempfile::TempDir, name: &str) -> StoreConfig {
        StoreConfig::new(format!(
            "sqlite://{}?mode=rwc",
            dir.path().join(name).display()
        ))
    }

    #[tokio::test]
    async fn fresh_backend_bootstraps_modern() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&config_for(&dir, "fresh.db")).await.unwrap();
        let version = detect_or_initialize(&pool).await.unwrap();
        assert_eq!(version, SchemaVersion::Modern);

        // Marker written
        let mut conn = pool.acquire().await.unwrap();
        let marker: String = sqlx::query_scalar(
            "SELECT meta_value FROM schema_metadata WHERE meta_key = 'schema_version'",
        )
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(marker, "modern");
    }

    #[tokio::test]
    async fn detection_is_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir, "reopen.db");

        let pool = StorePool::connect(&config).await.unwrap();
        assert_eq!(detect_or_initialize(&pool).await.unwrap(), SchemaVersion::Modern);
        pool.close().await;

        let pool = StorePool::connect(&config).await.unwrap();
        assert_eq!(detect_or_initialize(&pool).await.unwrap(), SchemaVersion::Modern);
    }

    #[tokio::test]
    async fn wide_event_table_detects_as_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir, "legacy.db");
        let pool = StorePool::connect(&config).await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            let _ = sqlx::query(
                "CREATE TABLE sessions (\
                   app_name TEXT NOT NULL, user_id TEXT NOT NULL, id TEXT NOT NULL, \
                   state TEXT NOT NULL, create_time TEXT NOT NULL, update_time TEXT NOT NULL, \
                   PRIMARY KEY (app_name, user_id, id))",
            )
            .execute(&mut *conn)
            .await
            .unwrap();
            let _ = sqlx::query(
                "CREATE TABLE events (\
                   id TEXT NOT NULL, app_name TEXT NOT NULL, user_id TEXT NOT NULL, \
                   session_id TEXT NOT NULL, invocation_id TEXT NOT NULL, author TEXT NOT NULL, \
                   branch TEXT, timestamp TEXT NOT NULL, content TEXT, actions BLOB NOT NULL, \
                   partial BIGINT NOT NULL, turn_complete BIGINT, interrupted BIGINT, \
                   error_code TEXT, error_message TEXT, input_transcription TEXT, \
                   output_transcription TEXT, token_usage TEXT, \
                   PRIMARY KEY (id, app_name, user_id, session_id))",
            )
            .execute(&mut *conn)
            .await
            .unwrap();
        }

        assert_eq!(detect_or_initialize(&pool).await.unwrap(), SchemaVersion::Legacy);
        pool.close().await;

        // Still legacy after reopen
        let pool = StorePool::connect(&config).await.unwrap();
        assert_eq!(detect_or_initialize(&pool).await.unwrap(), SchemaVersion::Legacy);
    }

    #[tokio::test]
    async fn foreign_event_table_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&config_for(&dir, "foreign.db")).await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            let _ = sqlx::query("CREATE TABLE events (id TEXT PRIMARY KEY, kind TEXT, body TEXT)")
                .execute(&mut *conn)
                .await
                .unwrap();
        }
        let err = detect_or_initialize(&pool).await.unwrap_err();
        assert_matches!(err, StoreError::SchemaMismatch(_));
    }

    #[tokio::test]
    async fn sessions_without_events_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&config_for(&dir, "partial.db")).await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            let _ = sqlx::query("CREATE TABLE sessions (id TEXT PRIMARY KEY)")
                .execute(&mut *conn)
                .await
                .unwrap();
        }
        let err = detect_or_initialize(&pool).await.unwrap_err();
        assert_matches!(err, StoreError::SchemaMismatch(_));
    }

    #[tokio::test]
    async fn junk_marker_value_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&config_for(&dir, "junk.db")).await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            let _ = sqlx::query(
                "CREATE TABLE schema_metadata (meta_key TEXT PRIMARY KEY, meta_value TEXT NOT NULL)",
            )
            .execute(&mut *conn)
            .await
            .unwrap();
            let _ = sqlx::query(
                "INSERT INTO schema_metadata (meta_key, meta_value) VALUES ('schema_version', 'v99')",
            )
            .execute(&mut *conn)
            .await
            .unwrap();
        }
        let err = detect_or_initialize(&pool).await.unwrap_err();
        assert_matches!(err, StoreError::SchemaMismatch(_));
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&config_for(&dir, "idem.db")).await.unwrap();
        assert_eq!(detect_or_initialize(&pool).await.unwrap(), SchemaVersion::Modern);
        assert_eq!(detect_or_initialize(&pool).await.unwrap(), SchemaVersion::Modern);
    }
}
