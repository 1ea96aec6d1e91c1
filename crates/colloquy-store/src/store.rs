//! High-level session store facade.
//!
//! Composes the pool, schema manager, serializer, and repositories into
//! atomic, session-centric operations. Every write runs inside a single
//! transaction — callers never observe partial state. Schema detection
//! runs once, during [`SessionStore::connect`]; the detected version is
//! write-once and threaded through every event-log and serializer call.
//!
//! Callers may wrap any operation in their own timeout: dropping the
//! future aborts the in-flight transaction (rolled back by the backend)
//! and returns the pooled handle.

use colloquy_core::event::Event;
use colloquy_core::ids::{EventId, SessionId};
use colloquy_core::session::Session;
use colloquy_core::state::{merge_state, split_delta, StateMap};
use colloquy_core::time;
use sqlx::pool::PoolConnection;
use sqlx::{Any, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::config::{RetryConfig, StoreConfig};
use crate::dialect::Dialect;
use crate::error::{Result, StoreError};
use crate::events::{EventRepo, ListEventsOptions};
use crate::pool::StorePool;
use crate::schema::{self, SchemaVersion};
use crate::serializer;
use crate::sessions::SessionRepo;
use crate::state::{AppStateRepo, UserStateRepo};

/// Durable store for conversation sessions and their event history.
///
/// Built once from connection parameters and passed by reference to all
/// callers; safe for concurrent use from arbitrary tasks.
pub struct SessionStore {
    pool: StorePool,
    schema: SchemaVersion,
    retry: RetryConfig,
    // SQLite has no row locks and rejects a second concurrent writer; a
    // process-level write lock serializes writers instead of surfacing
    // busy errors. Engines with row locks don't need it.
    write_lock: Option<Mutex<()>>,
}

impl SessionStore {
    /// Open a store: build the pool, then detect (or bootstrap) the
    /// backend's schema layout.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let retry = config.retry.clone();
        let pool = StorePool::connect(&config).await?;
        let schema = schema::detect_or_initialize(&pool).await?;
        info!(version = %schema, dialect = ?pool.dialect(), "session store ready");
        let write_lock = (pool.dialect() == Dialect::Sqlite).then(|| Mutex::new(()));
        Ok(Self {
            pool,
            schema,
            retry,
            write_lock,
        })
    }

    /// Parse a URL (including pool-tuning query parameters) and connect.
    pub async fn open(url: &str) -> Result<Self> {
        Self::connect(StoreConfig::from_url(url)?).await
    }

    /// The backend's detected schema layout.
    pub fn schema_version(&self) -> SchemaVersion {
        self.schema
    }

    /// Close every pooled connection and reject further operations.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Create a session. A fresh ID is generated when `session_id` is
    /// `None`; an explicit ID that already exists fails with
    /// `DuplicateKey`. Prefixed keys in the initial state route to the
    /// app/user tiers exactly like an event's state delta.
    #[instrument(skip(self, state))]
    pub async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<SessionId>,
        state: Option<StateMap>,
    ) -> Result<Session> {
        let id = session_id.unwrap_or_default();
        let split = split_delta(&state.unwrap_or_default());
        let now = time::utc_now();
        let dialect = self.pool.dialect();

        let _guard = self.write_guard().await;
        let mut tx = self.begin().await?;
        let _ = SessionRepo::insert(&mut tx, dialect, app_name, user_id, &id, &split.session, now)
            .await?;
        if !split.app.is_empty() {
            AppStateRepo::merge(&mut tx, dialect, app_name, &split.app, now).await?;
        }
        if !split.user.is_empty() {
            UserStateRepo::merge(&mut tx, dialect, app_name, user_id, &split.user, now).await?;
        }
        tx.commit().await?;
        debug!(session_id = %id, "session created");

        self.get_session(app_name, user_id, &id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {id} vanished after create")))
    }

    /// Fetch a session with its merged three-tier state view. Absence is
    /// a normal outcome, never an error. The merge runs on every read so
    /// the view always reflects the latest committed writes.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<Option<Session>> {
        let dialect = self.pool.dialect();
        let mut conn = self.acquire().await?;
        let Some(mut session) =
            SessionRepo::get(&mut conn, dialect, app_name, user_id, session_id).await?
        else {
            return Ok(None);
        };
        let app_state = AppStateRepo::get(&mut conn, dialect, app_name)
            .await?
            .unwrap_or_default();
        let user_state = UserStateRepo::get(&mut conn, dialect, app_name, user_id)
            .await?
            .unwrap_or_default();
        session.state = merge_state(&app_state, &user_state, &session.state);
        Ok(Some(session))
    }

    /// List every session for an (application, user) pair, newest
    /// activity first, each with its merged state view.
    #[instrument(skip(self))]
    pub async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        let dialect = self.pool.dialect();
        let mut conn = self.acquire().await?;
        let sessions = SessionRepo::list(&mut conn, dialect, app_name, user_id).await?;
        if sessions.is_empty() {
            return Ok(sessions);
        }
        let app_state = AppStateRepo::get(&mut conn, dialect, app_name)
            .await?
            .unwrap_or_default();
        let user_state = UserStateRepo::get(&mut conn, dialect, app_name, user_id)
            .await?
            .unwrap_or_default();
        Ok(sessions
            .into_iter()
            .map(|mut session| {
                session.state = merge_state(&app_state, &user_state, &session.state);
                session
            })
            .collect())
    }

    /// Delete a session and all of its events atomically. App and user
    /// state are scoped to the application/user, not the session row, and
    /// survive. Deleting an absent session is a no-op.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<()> {
        let dialect = self.pool.dialect();
        let _guard = self.write_guard().await;
        let mut tx = self.begin().await?;
        let existed = SessionRepo::delete(&mut tx, dialect, app_name, user_id, session_id).await?;
        tx.commit().await?;
        if existed {
            debug!("session deleted");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    /// Append an event to a session. Atomic — one transaction covers:
    ///
    /// 1. Validate the owning session exists (locking its row where the
    ///    engine supports row locks; same-session appends serialize here).
    /// 2. Encode the event for the backend's schema version.
    /// 3. Insert the row (`DuplicateKey` on an event-ID collision).
    /// 4. Route the state delta by key prefix: `app:` keys to application
    ///    state, `user:` keys to user state, bare keys to the session row,
    ///    whose `update_time` advances to the event timestamp.
    /// 5. Commit.
    #[instrument(skip(self, event), fields(session_id = %session_id, event_id = %event.id))]
    pub async fn append_event(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        event: &Event,
    ) -> Result<EventId> {
        let dialect = self.pool.dialect();
        let _guard = self.write_guard().await;
        let mut tx = self.begin().await?;

        let _session =
            SessionRepo::get_for_update(&mut tx, dialect, app_name, user_id, session_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        let encoded = serializer::encode(event, self.schema)?;
        EventRepo::insert(
            &mut tx,
            dialect,
            app_name,
            user_id,
            session_id,
            event,
            encoded,
        )
        .await?;

        let split = event.state_delta().map(split_delta).unwrap_or_default();
        if !split.app.is_empty() {
            AppStateRepo::merge(&mut tx, dialect, app_name, &split.app, event.timestamp).await?;
        }
        if !split.user.is_empty() {
            UserStateRepo::merge(
                &mut tx,
                dialect,
                app_name,
                user_id,
                &split.user,
                event.timestamp,
            )
            .await?;
        }
        // The session row is touched on every append: the bare-key patch
        // lands and update_time advances to the event timestamp.
        SessionRepo::patch_state(
            &mut tx,
            dialect,
            app_name,
            user_id,
            session_id,
            &split.session,
            event.timestamp,
        )
        .await?;

        tx.commit().await?;
        Ok(event.id.clone())
    }

    /// List a session's events ascending by timestamp, insertion order as
    /// the tie-break. The `since` bound is inclusive. Restartable: repeat
    /// calls return the same sequence absent concurrent writes. An absent
    /// session yields an empty list.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn list_events(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        opts: ListEventsOptions,
    ) -> Result<Vec<Event>> {
        let mut conn = self.acquire().await?;
        EventRepo::list(
            &mut conn,
            self.pool.dialect(),
            self.schema,
            app_name,
            user_id,
            session_id,
            &opts,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────

    async fn acquire(&self) -> Result<PoolConnection<Any>> {
        with_backoff(&self.retry, || self.pool.acquire()).await
    }

    async fn begin(&self) -> Result<Transaction<'static, Any>> {
        with_backoff(&self.retry, || self.pool.begin()).await
    }

    async fn write_guard(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.write_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

/// Retry `op` on transient failures with bounded exponential backoff.
/// Only connection acquisition goes through here — a transaction that may
/// have committed is never retried.
async fn with_backoff<T, F, Fut>(retry: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                let delay_ms = retry.backoff_ms(attempt);
                debug!(attempt, delay_ms, error = %err, "transient store error, backing off");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
