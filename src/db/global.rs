//! The global transaction and the ambient default data source.
//!
//! A global transaction binds one root transaction to a [`DataSource`]:
//! while it is active every statement sent through the data source runs
//! inside it, and [`DataSource::begin_transaction`] opens savepoints within
//! it. A test can start one, run arbitrary code and roll everything back
//! afterwards without resetting the schema.
//!
//! The slot has a single logical owner. Driving it from several tasks at
//! once is a usage error that is not detected.

use crate::db::pool::DataSource;
use crate::db::transaction::{ExitOptions, Transaction, TransactionOptions};
use crate::error::{DbError, DbResult};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::info;

impl DataSource {
    pub async fn start_global_transaction(&self, options: TransactionOptions) -> DbResult<()> {
        self.ensure_connected()?;
        let mut global = self.global.lock().await;
        if let Some(tx) = global.as_ref().filter(|tx| tx.is_active()) {
            return Err(DbError::invalid_input(format!(
                "global transaction {} is already active",
                tx.id()
            )));
        }
        let conn = self.pool.acquire().await?;
        let tx = Transaction::begin(self.dialect(), conn, options).await?;
        info!(
            connection_id = %self.config.id,
            transaction_id = %tx.id(),
            "Global transaction started"
        );
        *global = Some(tx);
        Ok(())
    }

    pub async fn commit_global_transaction(&self) -> DbResult<()> {
        self.commit_global_transaction_with(ExitOptions::default())
            .await
    }

    pub async fn commit_global_transaction_with(&self, options: ExitOptions) -> DbResult<()> {
        let tx = self.take_global(options).await?;
        if let Some(tx) = tx {
            tx.commit_with(options).await?;
            info!(connection_id = %self.config.id, "Global transaction committed");
        }
        Ok(())
    }

    pub async fn rollback_global_transaction(&self) -> DbResult<()> {
        self.rollback_global_transaction_with(ExitOptions::default())
            .await
    }

    pub async fn rollback_global_transaction_with(&self, options: ExitOptions) -> DbResult<()> {
        let tx = self.take_global(options).await?;
        if let Some(tx) = tx {
            tx.rollback_with(options).await?;
            info!(connection_id = %self.config.id, "Global transaction rolled back");
        }
        Ok(())
    }

    pub async fn has_global_transaction(&self) -> bool {
        self.global
            .lock()
            .await
            .as_ref()
            .is_some_and(Transaction::is_active)
    }

    async fn take_global(&self, options: ExitOptions) -> DbResult<Option<Transaction>> {
        let tx = self.global.lock().await.take();
        match tx {
            Some(tx) => Ok(Some(tx)),
            None if options.throw_error_on_inactive => Err(DbError::inactive_transaction(
                "global",
                "no global transaction",
            )),
            None => Ok(None),
        }
    }
}

static DEFAULT_SOURCE: OnceLock<RwLock<Option<Arc<DataSource>>>> = OnceLock::new();

fn default_slot() -> &'static RwLock<Option<Arc<DataSource>>> {
    DEFAULT_SOURCE.get_or_init(|| RwLock::new(None))
}

/// Install the process-wide ambient data source.
///
/// Reserved for test harnesses and short scripts; library code should
/// take a data source handle explicitly.
pub fn set_default_source(source: Arc<DataSource>) {
    if let Ok(mut slot) = default_slot().write() {
        *slot = Some(source);
    }
}

/// Remove the ambient data source, returning it.
pub fn clear_default_source() -> Option<Arc<DataSource>> {
    default_slot().write().ok().and_then(|mut slot| slot.take())
}

/// The ambient data source, or `CONNECTION_NOT_ESTABLISHED` when none is set.
pub fn default_source() -> DbResult<Arc<DataSource>> {
    default_slot()
        .read()
        .ok()
        .and_then(|slot| slot.clone())
        .ok_or_else(|| DbError::not_connected("no default data source has been set"))
}
