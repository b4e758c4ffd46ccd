//! Advisory locks.
//!
//! A lock is taken on a connection checked out for that purpose and held
//! until the lock is released, since PostgreSQL, MySQL and SQL Server all
//! scope advisory locks to the session. Acquisition is re-entrant per data
//! source: taking a key this source already holds only bumps a counter.
//! SQLite locks whole files and reports every acquire and release as
//! successful.

use crate::db::executor::PooledConnection;
use crate::db::pool::DataSource;
use crate::error::{DbError, DbResult};
use crate::models::Dialect;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval between two try-acquire attempts while waiting for a lock.
pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

/// A lock held by a [`DataSource`], with its re-entry count.
#[derive(Debug)]
pub(crate) struct HeldLock {
    connection: PooledConnection,
    depth: usize,
}

impl DataSource {
    /// Acquire the advisory lock `key`, waiting up to `timeout_ms` for a
    /// holder elsewhere to release it. Returns `false` on timeout.
    ///
    /// Without a timeout a single attempt is made. The lock map is only
    /// held to check and record locks, never while waiting.
    pub async fn acquire_lock(&self, key: &str, timeout_ms: Option<u64>) -> DbResult<bool> {
        self.ensure_connected()?;
        let dialect = self.dialect();
        let Some(statement) = dialect.advisory_lock_statement(key) else {
            return Ok(true);
        };
        if self.reenter(key).await {
            return Ok(true);
        }

        let mut connection = self.pool.acquire().await?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.unwrap_or(0));
        loop {
            let rows = connection
                .fetch_rows(&statement.sql, &statement.params)
                .await?;
            let acquired = rows
                .first()
                .and_then(|row| row.get("locked"))
                .is_some_and(|v| dialect.lock_acquired(v));
            if acquired {
                let mut locks = self.locks.lock().await;
                if let Some(held) = locks.get_mut(key) {
                    // Recorded by a concurrent caller on this source meanwhile
                    held.depth += 1;
                    drop(locks);
                    unlock_session(dialect, &mut connection, key).await?;
                    return Ok(true);
                }
                info!(key, connection_id = %self.config.id, "Advisory lock acquired");
                locks.insert(
                    key.to_string(),
                    HeldLock {
                        connection,
                        depth: 1,
                    },
                );
                return Ok(true);
            }
            if self.reenter(key).await {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!(key, timeout_ms = ?timeout_ms, "Timed out waiting for advisory lock");
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS)).await;
        }
    }

    /// Bump the re-entry count when this source already holds `key`.
    async fn reenter(&self, key: &str) -> bool {
        let mut locks = self.locks.lock().await;
        match locks.get_mut(key) {
            Some(held) => {
                held.depth += 1;
                debug!(key, depth = held.depth, "Advisory lock re-entered");
                true
            }
            None => false,
        }
    }

    /// Release one level of the advisory lock `key`. The lock is handed back
    /// to the database when the outermost acquisition is released.
    pub async fn release_lock(&self, key: &str) -> DbResult<bool> {
        self.ensure_connected()?;
        let dialect = self.dialect();
        if dialect.advisory_unlock_statement(key).is_none() {
            return Ok(true);
        }

        let mut held = {
            let mut locks = self.locks.lock().await;
            let Some(held) = locks.get_mut(key) else {
                return Err(DbError::lock_not_held(key));
            };
            if held.depth > 1 {
                held.depth -= 1;
                debug!(key, depth = held.depth, "Advisory lock level released");
                return Ok(true);
            }
            locks.remove(key).ok_or_else(|| DbError::lock_not_held(key))?
        };
        unlock_session(dialect, &mut held.connection, key).await?;
        info!(key, connection_id = %self.config.id, "Advisory lock released");
        Ok(true)
    }

    /// Hand every held lock back to the database, whatever its re-entry
    /// count. Connections return to the pool only after their unlock ran.
    pub(crate) async fn release_all_locks(&self) {
        let held: Vec<(String, HeldLock)> = self.locks.lock().await.drain().collect();
        let dialect = self.dialect();
        for (key, mut lock) in held {
            match unlock_session(dialect, &mut lock.connection, &key).await {
                Ok(()) => info!(key, connection_id = %self.config.id, "Advisory lock released"),
                Err(e) => warn!(key, error = %e, "Failed to release advisory lock"),
            }
        }
    }

    /// Whether this data source currently holds `key`.
    pub async fn holds_lock(&self, key: &str) -> bool {
        self.locks.lock().await.contains_key(key)
    }
}

/// Run the dialect's unlock statement for `key` on the session holding it.
async fn unlock_session(
    dialect: Dialect,
    connection: &mut PooledConnection,
    key: &str,
) -> DbResult<()> {
    let Some(statement) = dialect.advisory_unlock_statement(key) else {
        return Ok(());
    };
    if dialect == Dialect::Mssql {
        connection.execute(&statement.sql, &statement.params).await?;
    } else {
        connection.fetch_rows(&statement.sql, &statement.params).await?;
    }
    Ok(())
}
