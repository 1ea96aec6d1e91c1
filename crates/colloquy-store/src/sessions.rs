//! Session repository.
//!
//! Stateless — every method takes a connection, so callers decide the
//! transaction scope. The sessions table is identical under both schema
//! layouts; only the event table differs.

use chrono::{DateTime, Utc};
use colloquy_core::ids::SessionId;
use colloquy_core::session::Session;
use colloquy_core::state::StateMap;
use colloquy_core::time;
use sqlx::any::AnyRow;
use sqlx::AnyConnection;

use crate::dialect::Dialect;
use crate::error::{Result, StoreError};
use crate::row;

/// Session repository.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new session row. A key-triple collision surfaces as
    /// `DuplicateKey`.
    pub async fn insert(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
        state: &StateMap,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let sql = dialect.sql(
            "INSERT INTO sessions (app_name, user_id, id, state, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?)",
        );
        let ts = time::format(now);
        let _ = sqlx::query(&sql)
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .bind(serde_json::to_string(state)?)
            .bind(ts.clone())
            .bind(ts)
            .execute(&mut *conn)
            .await?;
        Ok(Session {
            app_name: app_name.to_owned(),
            user_id: user_id.to_owned(),
            id: id.clone(),
            state: state.clone(),
            create_time: now,
            update_time: now,
        })
    }

    /// Fetch a session row, or `None`.
    pub async fn get(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
    ) -> Result<Option<Session>> {
        Self::fetch(conn, dialect, app_name, user_id, id, false).await
    }

    /// Fetch a session row and take the backend's row lock where the
    /// engine supports one. Same-session appends serialize on this lock.
    pub async fn get_for_update(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
    ) -> Result<Option<Session>> {
        Self::fetch(conn, dialect, app_name, user_id, id, true).await
    }

    async fn fetch(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
        lock: bool,
    ) -> Result<Option<Session>> {
        let mut sql = String::from(
            "SELECT state, create_time, update_time FROM sessions \
             WHERE app_name = ? AND user_id = ? AND id = ?",
        );
        if lock {
            sql.push_str(dialect.for_update());
        }
        let sql = dialect.sql(&sql);
        let Some(found) = sqlx::query(&sql)
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(row_to_session(&found, app_name, user_id, id.clone())?))
    }

    /// List every session for an (application, user) pair, newest
    /// activity first.
    pub async fn list(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<Session>> {
        let sql = dialect.sql(
            "SELECT id, state, create_time, update_time FROM sessions \
             WHERE app_name = ? AND user_id = ? \
             ORDER BY update_time DESC, id ASC",
        );
        let rows = sqlx::query(&sql)
            .bind(app_name)
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|found| {
                let id = SessionId::from_raw(row::get::<String>(found, "sessions", "id")?);
                row_to_session(found, app_name, user_id, id)
            })
            .collect()
    }

    /// Delete a session and its events — events first, session second, so
    /// no orphan events can survive even on an engine without cascade
    /// support. Returns whether the session row existed.
    pub async fn delete(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
    ) -> Result<bool> {
        let events = dialect.sql(
            "DELETE FROM events WHERE app_name = ? AND user_id = ? AND session_id = ?",
        );
        let _ = sqlx::query(&events)
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;

        let sessions =
            dialect.sql("DELETE FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?");
        let result = sqlx::query(&sessions)
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Shallow-merge a patch into the session state (later values win per
    /// key) and advance `update_time`. Fails with `NotFound` if the
    /// session is absent.
    pub async fn patch_state(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
        patch: &StateMap,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let select = dialect.sql(&format!(
            "SELECT state FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?{}",
            dialect.for_update()
        ));
        let found = sqlx::query(&select)
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;

        let raw: String = row::get(&found, "sessions", "state")?;
        let mut state = row::parse_state(&raw, "sessions", "state")?;
        for (key, value) in patch {
            let _ = state.insert(key.clone(), value.clone());
        }

        let update = dialect.sql(
            "UPDATE sessions SET state = ?, update_time = ? \
             WHERE app_name = ? AND user_id = ? AND id = ?",
        );
        let _ = sqlx::query(&update)
            .bind(serde_json::to_string(&state)?)
            .bind(time::format(now))
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

fn row_to_session(
    found: &AnyRow,
    app_name: &str,
    user_id: &str,
    id: SessionId,
) -> Result<Session> {
    let state_raw: String = row::get(found, "sessions", "state")?;
    let create_raw: String = row::get(found, "sessions", "create_time")?;
    let update_raw: String = row::get(found, "sessions", "update_time")?;
    Ok(Session {
        app_name: app_name.to_owned(),
        user_id: user_id.to_owned(),
        id,
        state: row::parse_state(&state_raw, "sessions", "state")?,
        create_time: row::parse_ts(&create_raw, "sessions", "create_time")?,
        update_time: row::parse_ts(&update_raw, "sessions", "update_time")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
