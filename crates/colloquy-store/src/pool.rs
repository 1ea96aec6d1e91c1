//! Bounded connection pool over any supported engine.
//!
//! One [`StorePool`] per store instance. Capacity is `pool_size +
//! max_overflow`; acquires beyond that block up to the configured timeout
//! and then fail with `PoolExhausted`. Handles are never shared between
//! logical operations and return to the pool on drop, on every exit path.
//!
//! New SQLite connections get WAL mode, foreign keys, and a busy timeout
//! applied before first use.

use std::sync::Once;

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Transaction};
use tracing::info;

use crate::config::StoreConfig;
use crate::dialect::Dialect;
use crate::error::{Result, StoreError};

static DRIVERS: Once = Once::new();

/// Pragmas applied to every new SQLite connection.
const SQLITE_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA synchronous = NORMAL",
];

/// A bounded set of live backend connections for one store instance.
pub struct StorePool {
    pool: AnyPool,
    dialect: Dialect,
}

impl StorePool {
    /// Open a pool for the configured URL.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        DRIVERS.call_once(install_default_drivers);
        let dialect = Dialect::from_url(&config.url)?;

        let mut options = AnyPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout);
        if let Some(recycle) = config.recycle {
            options = options.max_lifetime(recycle);
        }
        if dialect == Dialect::Sqlite {
            options = options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    for pragma in SQLITE_PRAGMAS {
                        let _ = sqlx::query(pragma).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            });
        }

        let pool = options.connect(&config.url).await.map_err(StoreError::from)?;
        info!(
            ?dialect,
            max_connections = config.max_connections(),
            "connection pool ready"
        );
        Ok(Self { pool, dialect })
    }

    /// The engine family this pool speaks.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Borrow one pooled connection. Blocks up to the acquire timeout,
    /// then fails with `PoolExhausted`.
    pub async fn acquire(&self) -> Result<PoolConnection<Any>> {
        self.pool.acquire().await.map_err(StoreError::from)
    }

    /// Open a transaction on a pooled connection. Dropping the
    /// transaction without committing rolls it back.
    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        self.pool.begin().await.map_err(StoreError::from)
    }

    /// Close every pooled connection and reject further acquires.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn sqlite_config(dir: &tempfile::TempDir) -> StoreConfig {
        StoreConfig::new(format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("pool.db").display()
        ))
    }

    #[tokio::test]
    async fn connect_and_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&sqlite_config(&dir)).await.unwrap();
        assert_eq!(pool.dialect(), Dialect::Sqlite);
        let _conn = pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_pragmas_applied() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&sqlite_config(&dir)).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn acquire_fails_with_pool_exhausted_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sqlite_config(&dir);
        config.pool_size = 1;
        config.max_overflow = 0;
        config.acquire_timeout = Duration::from_millis(200);
        let pool = StorePool::connect(&config).await.unwrap();

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert_matches!(err, StoreError::PoolExhausted(_));

        // Releasing the handle frees the slot
        drop(held);
        let _conn = pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&sqlite_config(&dir)).await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            let _ = sqlx::query("CREATE TABLE t (x BIGINT)")
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        {
            let mut tx = pool.begin().await.unwrap();
            let _ = sqlx::query("INSERT INTO t (x) VALUES (1)")
                .execute(&mut *tx)
                .await
                .unwrap();
            // Dropped without commit
        }

        let mut conn = pool.acquire().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn close_rejects_further_acquires() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StorePool::connect(&sqlite_config(&dir)).await.unwrap();
        pool.close().await;
        let err = pool.acquire().await.unwrap_err();
        assert_matches!(err, StoreError::Connection(_));
    }
}
