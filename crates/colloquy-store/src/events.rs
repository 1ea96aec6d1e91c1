//! Event log repository.
//!
//! Events are immutable and strictly append-only: there is no update
//! statement in this module, and rows only disappear through session
//! deletion. Listing is ascending by timestamp with insertion order as the
//! tie-break — the modern layout carries a per-session `seq` counter for
//! that; legacy backends (whose column set is fixed and external) fall
//! back to the event ID, which is equally stable across repeated reads.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use colloquy_core::event::Event;
use colloquy_core::ids::{EventId, SessionId};
use colloquy_core::time;
use sqlx::any::AnyRow;
use sqlx::AnyConnection;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row;
use crate::schema::SchemaVersion;
use crate::serializer::{self, EncodedEvent, LegacyColumns};

/// Options for listing a session's events.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListEventsOptions {
    /// Inclusive lower bound on the event timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of events to return.
    pub limit: Option<u32>,
}

/// Event repository.
pub struct EventRepo;

impl EventRepo {
    /// Insert an encoded event row. Under the modern layout the
    /// per-session `seq` counter is assigned here; callers must hold the
    /// owning session's row lock (the append transaction does) so the
    /// counter cannot race. A duplicate event ID surfaces as
    /// `DuplicateKey`.
    pub async fn insert(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        event: &Event,
        encoded: EncodedEvent,
    ) -> Result<()> {
        let ts = time::format(event.timestamp);
        match encoded {
            EncodedEvent::Modern { payload } => {
                let seq = next_seq(conn, dialect, app_name, user_id, session_id).await?;
                let sql = dialect.sql(
                    "INSERT INTO events (id, app_name, user_id, session_id, timestamp, seq, payload) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                );
                let _ = sqlx::query(&sql)
                    .bind(event.id.as_str())
                    .bind(app_name)
                    .bind(user_id)
                    .bind(session_id.as_str())
                    .bind(ts)
                    .bind(seq)
                    .bind(payload)
                    .execute(&mut *conn)
                    .await?;
            }
            EncodedEvent::Legacy(columns) => {
                let columns = *columns;
                let sql = dialect.sql(
                    "INSERT INTO events (id, app_name, user_id, session_id, invocation_id, \
                     author, branch, timestamp, content, actions, partial, turn_complete, \
                     interrupted, error_code, error_message, input_transcription, \
                     output_transcription, token_usage) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                );
                let _ = sqlx::query(&sql)
                    .bind(event.id.as_str())
                    .bind(app_name)
                    .bind(user_id)
                    .bind(session_id.as_str())
                    .bind(columns.invocation_id)
                    .bind(columns.author)
                    .bind(columns.branch)
                    .bind(ts)
                    .bind(columns.content)
                    .bind(columns.actions)
                    .bind(i64::from(columns.partial))
                    .bind(columns.turn_complete.map(i64::from))
                    .bind(columns.interrupted.map(i64::from))
                    .bind(columns.error_code)
                    .bind(columns.error_message)
                    .bind(columns.input_transcription)
                    .bind(columns.output_transcription)
                    .bind(columns.usage)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }

    /// List a session's events ascending. Repeat calls return the same
    /// sequence absent concurrent writes; an absent session yields an
    /// empty list.
    pub async fn list(
        conn: &mut AnyConnection,
        dialect: Dialect,
        version: SchemaVersion,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        opts: &ListEventsOptions,
    ) -> Result<Vec<Event>> {
        let mut sql = String::from(match version {
            SchemaVersion::Modern => {
                "SELECT id, timestamp, payload FROM events \
                 WHERE app_name = ? AND user_id = ? AND session_id = ?"
            }
            SchemaVersion::Legacy => {
                "SELECT id, timestamp, invocation_id, author, branch, content, actions, \
                 partial, turn_complete, interrupted, error_code, error_message, \
                 input_transcription, output_transcription, token_usage FROM events \
                 WHERE app_name = ? AND user_id = ? AND session_id = ?"
            }
        });
        if opts.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        sql.push_str(match version {
            SchemaVersion::Modern => " ORDER BY timestamp ASC, seq ASC",
            SchemaVersion::Legacy => " ORDER BY timestamp ASC, id ASC",
        });
        if let Some(limit) = opts.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let sql = dialect.sql(&sql);
        let mut query = sqlx::query(&sql)
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str());
        if let Some(since) = opts.since {
            query = query.bind(time::format(since));
        }

        let rows = query.fetch_all(&mut *conn).await?;
        rows.iter().map(|found| decode_row(found, version)).collect()
    }

    /// Count a session's events.
    pub async fn count(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<i64> {
        let sql = dialect.sql(
            "SELECT COUNT(*) FROM events WHERE app_name = ? AND user_id = ? AND session_id = ?",
        );
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }
}

async fn next_seq(
    conn: &mut AnyConnection,
    dialect: Dialect,
    app_name: &str,
    user_id: &str,
    session_id: &SessionId,
) -> Result<i64> {
    let sql = dialect.sql(
        "SELECT COALESCE(MAX(seq), -1) + 1 FROM events \
         WHERE app_name = ? AND user_id = ? AND session_id = ?",
    );
    let seq = sqlx::query_scalar::<_, i64>(&sql)
        .bind(app_name)
        .bind(user_id)
        .bind(session_id.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(seq)
}

fn decode_row(found: &AnyRow, version: SchemaVersion) -> Result<Event> {
    let id = EventId::from_raw(row::get::<String>(found, "events", "id")?);
    let ts_raw: String = row::get(found, "events", "timestamp")?;
    let timestamp = row::parse_ts(&ts_raw, "events", "timestamp")?;

    match version {
        SchemaVersion::Modern => {
            let payload: String = row::get(found, "events", "payload")?;
            serializer::decode_modern(id, timestamp, &payload)
        }
        SchemaVersion::Legacy => {
            let columns = LegacyColumns {
                invocation_id: row::get(found, "events", "invocation_id")?,
                author: row::get(found, "events", "author")?,
                branch: row::get(found, "events", "branch")?,
                content: row::get(found, "events", "content")?,
                actions: row::get(found, "events", "actions")?,
                partial: row::get::<i64>(found, "events", "partial")? != 0,
                turn_complete: row::flag(row::get(found, "events", "turn_complete")?),
                interrupted: row::flag(row::get(found, "events", "interrupted")?),
                error_code: row::get(found, "events", "error_code")?,
                error_message: row::get(found, "events", "error_message")?,
                input_transcription: row::get(found, "events", "input_transcription")?,
                output_transcription: row::get(found, "events", "output_transcription")?,
                usage: row::get(found, "events", "token_usage")?,
            };
            serializer::decode_legacy(id, timestamp, columns)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
