//! Transactions with nested savepoints.
//!
//! A root [`Transaction`] owns one pooled connection for its whole life.
//! Nested transactions share that connection and are backed by uniquely
//! named savepoints:
//!
//! - committing a nested transaction releases its savepoint
//! - rolling one back undoes only the writes made since its savepoint
//! - neither changes the state of the parent
//!
//! Every transaction moves from `Active` to `Committed` or `RolledBack`
//! exactly once. Exiting a transaction that already left `Active` is an
//! `INACTIVE_TRANSACTION` error unless [`ExitOptions`] says otherwise.

use crate::db::executor::{Executor, PooledConnection, Row};
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, ExecResult, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Ignored by SQLite, which is always serializable.
    pub isolation_level: Option<IsolationLevel>,
}

impl TransactionOptions {
    pub fn isolation(level: IsolationLevel) -> Self {
        Self {
            isolation_level: Some(level),
        }
    }
}

/// Behaviour of commit/rollback on a transaction that is no longer active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOptions {
    pub throw_error_on_inactive: bool,
}

impl ExitOptions {
    /// Treat exiting an inactive transaction as a no-op.
    pub fn lenient() -> Self {
        Self {
            throw_error_on_inactive: false,
        }
    }
}

impl Default for ExitOptions {
    fn default() -> Self {
        Self {
            throw_error_on_inactive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

type SharedConnection = Arc<Mutex<Option<PooledConnection>>>;

/// An open transaction or savepoint scope.
///
/// Dropping a transaction that is still active rolls it back (a nested
/// one to its savepoint) on a spawned task; commit or roll back explicitly
/// to observe errors.
#[derive(Debug)]
pub struct Transaction {
    id: String,
    dialect: Dialect,
    connection: SharedConnection,
    savepoint: Option<String>,
    depth: usize,
    state: std::sync::Mutex<TransactionState>,
}

impl Transaction {
    /// Open a root transaction on a freshly checked-out connection.
    pub(crate) async fn begin(
        dialect: Dialect,
        mut connection: PooledConnection,
        options: TransactionOptions,
    ) -> DbResult<Self> {
        for statement in dialect.begin_statements(options.isolation_level) {
            connection.execute(&statement, &[]).await?;
        }
        let tx = Self {
            id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
            dialect,
            connection: Arc::new(Mutex::new(Some(connection))),
            savepoint: None,
            depth: 0,
            state: std::sync::Mutex::new(TransactionState::Active),
        };
        info!(
            transaction_id = %tx.id,
            dialect = %dialect,
            isolation = ?options.isolation_level,
            "Transaction started"
        );
        Ok(tx)
    }

    /// Open a savepoint scope inside this transaction.
    pub async fn begin_nested_transaction(&self) -> DbResult<Transaction> {
        self.ensure_active()?;
        let name = format!("sp_{}", uuid::Uuid::new_v4().simple());
        {
            let mut guard = self.connection.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| DbError::inactive_transaction(&self.id, self.state()))?;
            conn.execute(&self.dialect.savepoint_statement(&name), &[])
                .await?;
        }
        info!(
            transaction_id = %self.id,
            savepoint = %name,
            depth = self.depth + 1,
            "Nested transaction started"
        );
        Ok(Transaction {
            id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
            dialect: self.dialect,
            connection: Arc::clone(&self.connection),
            savepoint: Some(name),
            depth: self.depth + 1,
            state: std::sync::Mutex::new(TransactionState::Active),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Savepoint backing this scope; `None` for a root transaction.
    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    pub fn state(&self) -> TransactionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(TransactionState::RolledBack)
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// 0 for a root transaction, parent depth + 1 for nested ones.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_nested(&self) -> bool {
        self.savepoint.is_some()
    }

    fn ensure_active(&self) -> DbResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            state => Err(DbError::inactive_transaction(&self.id, state)),
        }
    }

    /// Move to a terminal state. Returns false (or an error) when the
    /// transaction was already finished.
    fn finish(&self, next: TransactionState, options: ExitOptions) -> DbResult<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DbError::inactive_transaction(&self.id, "poisoned"))?;
        if *state != TransactionState::Active {
            if options.throw_error_on_inactive {
                return Err(DbError::inactive_transaction(&self.id, *state));
            }
            return Ok(false);
        }
        *state = next;
        Ok(true)
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.commit_with(ExitOptions::default()).await
    }

    pub async fn commit_with(&self, options: ExitOptions) -> DbResult<()> {
        if !self.finish(TransactionState::Committed, options)? {
            return Ok(());
        }
        let mut guard = self.connection.lock().await;
        match &self.savepoint {
            Some(name) => {
                // SQL Server has no RELEASE SAVEPOINT; the savepoint simply
                // becomes part of the outer scope
                if let Some(statement) = self.dialect.release_savepoint_statement(name) {
                    let conn = guard
                        .as_mut()
                        .ok_or_else(|| DbError::inactive_transaction(&self.id, "closed"))?;
                    conn.execute(&statement, &[]).await?;
                }
            }
            None => {
                let mut conn = guard
                    .take()
                    .ok_or_else(|| DbError::inactive_transaction(&self.id, "closed"))?;
                conn.execute(self.dialect.commit_statement(), &[]).await?;
            }
        }
        info!(transaction_id = %self.id, depth = self.depth, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.rollback_with(ExitOptions::default()).await
    }

    pub async fn rollback_with(&self, options: ExitOptions) -> DbResult<()> {
        if !self.finish(TransactionState::RolledBack, options)? {
            return Ok(());
        }
        let mut guard = self.connection.lock().await;
        match &self.savepoint {
            Some(name) => {
                let conn = guard
                    .as_mut()
                    .ok_or_else(|| DbError::inactive_transaction(&self.id, "closed"))?;
                conn.execute(&self.dialect.rollback_to_savepoint_statement(name), &[])
                    .await?;
            }
            None => {
                let mut conn = guard
                    .take()
                    .ok_or_else(|| DbError::inactive_transaction(&self.id, "closed"))?;
                conn.execute(self.dialect.rollback_statement(), &[]).await?;
            }
        }
        info!(transaction_id = %self.id, depth = self.depth, "Transaction rolled back");
        Ok(())
    }
}

impl Executor for Transaction {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.ensure_active()?;
        let mut guard = self.connection.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DbError::inactive_transaction(&self.id, "closed"))?;
        conn.fetch_rows(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<ExecResult> {
        self.ensure_active()?;
        let mut guard = self.connection.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DbError::inactive_transaction(&self.id, "closed"))?;
        conn.execute(sql, params).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        let dialect = self.dialect;
        let id = self.id.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(transaction_id = %id, "Transaction dropped while active outside a runtime");
            return;
        };

        if let Some(name) = &self.savepoint {
            // Taken now so the parent cannot run statements before the rollback
            let Ok(mut guard) = Arc::clone(&self.connection).try_lock_owned() else {
                warn!(
                    transaction_id = %id,
                    savepoint = %name,
                    "Nested transaction dropped while its connection was busy; writes stay in the parent"
                );
                return;
            };
            warn!(transaction_id = %id, savepoint = %name, "Nested transaction dropped while active; rolling back to savepoint");
            let statement = dialect.rollback_to_savepoint_statement(name);
            handle.spawn(async move {
                let Some(conn) = guard.as_mut() else {
                    return;
                };
                if let Err(e) = conn.execute(&statement, &[]).await {
                    warn!(transaction_id = %id, error = %e, "Rollback of dropped savepoint failed");
                }
            });
            return;
        }

        let connection = Arc::clone(&self.connection);
        warn!(transaction_id = %id, "Transaction dropped while active; rolling back");
        handle.spawn(async move {
            let Some(mut conn) = connection.lock().await.take() else {
                return;
            };
            if let Err(e) = conn.execute(dialect.rollback_statement(), &[]).await {
                warn!(transaction_id = %id, error = %e, "Rollback of dropped transaction failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(
            Dialect::MySql.begin_statements(Some(IsolationLevel::Serializable)),
            vec![
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string(),
                "START TRANSACTION".to_string()
            ]
        );
        assert_eq!(
            Dialect::Sqlite.begin_statements(Some(IsolationLevel::ReadCommitted)),
            vec!["BEGIN".to_string()]
        );
    }

    #[test]
    fn test_exit_options_default_is_strict() {
        assert!(ExitOptions::default().throw_error_on_inactive);
        assert!(!ExitOptions::lenient().throw_error_on_inactive);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransactionState::RolledBack.to_string(), "rolled_back");
        let err = DbError::inactive_transaction("tx_1", TransactionState::Committed);
        assert!(err.to_string().contains("committed"));
    }
}
