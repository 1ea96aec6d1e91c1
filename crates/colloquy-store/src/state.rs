//! Application- and user-scoped state stores.
//!
//! One row per key; rows are created on first write and updated in place
//! thereafter, never deleted by session operations. Merges run
//! read-modify-write inside the caller's transaction: the row is
//! materialized with an insert-if-absent first so there is always a row
//! to lock on engines with row locks.

use chrono::{DateTime, Utc};
use colloquy_core::state::StateMap;
use colloquy_core::time;
use sqlx::AnyConnection;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row;

/// Application-wide state store (one row per application).
pub struct AppStateRepo;

impl AppStateRepo {
    /// Fetch the state map for an application, or `None` before the
    /// first write.
    pub async fn get(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
    ) -> Result<Option<StateMap>> {
        let sql = dialect.sql("SELECT state FROM app_states WHERE app_name = ?");
        let found = sqlx::query(&sql)
            .bind(app_name)
            .fetch_optional(&mut *conn)
            .await?;
        found
            .map(|r| {
                let raw: String = row::get(&r, "app_states", "state")?;
                row::parse_state(&raw, "app_states", "state")
            })
            .transpose()
    }

    /// Shallow-merge a patch into the application state.
    pub async fn merge(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        patch: &StateMap,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ts = time::format(now);
        let seed = dialect.insert_ignore(
            "INSERT INTO app_states (app_name, state, update_time) VALUES (?, ?, ?)",
        );
        let _ = sqlx::query(&dialect.sql(&seed))
            .bind(app_name)
            .bind("{}")
            .bind(ts.clone())
            .execute(&mut *conn)
            .await?;

        let select = dialect.sql(&format!(
            "SELECT state FROM app_states WHERE app_name = ?{}",
            dialect.for_update()
        ));
        let found = sqlx::query(&select)
            .bind(app_name)
            .fetch_one(&mut *conn)
            .await?;
        let raw: String = row::get(&found, "app_states", "state")?;
        let mut state = row::parse_state(&raw, "app_states", "state")?;
        for (key, value) in patch {
            let _ = state.insert(key.clone(), value.clone());
        }

        let update =
            dialect.sql("UPDATE app_states SET state = ?, update_time = ? WHERE app_name = ?");
        let _ = sqlx::query(&update)
            .bind(serde_json::to_string(&state)?)
            .bind(ts)
            .bind(app_name)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Per-user state store (one row per application/user pair), persisting
/// across all of that user's sessions.
pub struct UserStateRepo;

impl UserStateRepo {
    /// Fetch the state map for a user, or `None` before the first write.
    pub async fn get(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
    ) -> Result<Option<StateMap>> {
        let sql =
            dialect.sql("SELECT state FROM user_states WHERE app_name = ? AND user_id = ?");
        let found = sqlx::query(&sql)
            .bind(app_name)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        found
            .map(|r| {
                let raw: String = row::get(&r, "user_states", "state")?;
                row::parse_state(&raw, "user_states", "state")
            })
            .transpose()
    }

    /// Shallow-merge a patch into the user state.
    pub async fn merge(
        conn: &mut AnyConnection,
        dialect: Dialect,
        app_name: &str,
        user_id: &str,
        patch: &StateMap,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ts = time::format(now);
        let seed = dialect.insert_ignore(
            "INSERT INTO user_states (app_name, user_id, state, update_time) VALUES (?, ?, ?, ?)",
        );
        let _ = sqlx::query(&dialect.sql(&seed))
            .bind(app_name)
            .bind(user_id)
            .bind("{}")
            .bind(ts.clone())
            .execute(&mut *conn)
            .await?;

        let select = dialect.sql(&format!(
            "SELECT state FROM user_states WHERE app_name = ? AND user_id = ?{}",
            dialect.for_update()
        ));
        let found = sqlx::query(&select)
            .bind(app_name)
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
        let raw: String = row::get(&found, "user_states", "state")?;
        let mut state = row::parse_state(&raw, "user_states", "state")?;
        for (key, value) in patch {
            let _ = state.insert(key.clone(), value.clone());
        }

        let update = dialect.sql(
            "UPDATE user_states SET state = ?, update_time = ? \
             WHERE app_name = ? AND user_id = ?",
        );
        let _ = sqlx::query(&update)
            .bind(serde_json::to_string(&state)?)
            .bind(ts)
            .bind(app_name)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
