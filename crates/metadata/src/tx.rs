//! Transaction handles for the creation flow.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::TxHandle;
use async_trait::async_trait;
use sqlx::{Database, Postgres, Sqlite, Transaction};

/// An open database transaction.
///
/// Finishing the handle (commit or rollback) releases the connection; a
/// second commit fails with [`MetadataError::TransactionFinished`] while a
/// second rollback is a no-op. Dropping an unfinished handle rolls back.
pub struct SqlTx<DB: Database> {
    inner: Option<Transaction<'static, DB>>,
}

pub type SqliteTx = SqlTx<Sqlite>;
pub type PgTx = SqlTx<Postgres>;

impl<DB: Database> SqlTx<DB> {
    pub(crate) fn new(inner: Transaction<'static, DB>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Borrow the live transaction for a statement.
    pub(crate) fn conn(&mut self) -> MetadataResult<&mut Transaction<'static, DB>> {
        self.inner.as_mut().ok_or(MetadataError::TransactionFinished)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }
}

#[async_trait]
impl<DB: Database> TxHandle for SqlTx<DB> {
    async fn commit(&mut self) -> MetadataResult<()> {
        let tx = self.inner.take().ok_or(MetadataError::TransactionFinished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> MetadataResult<()> {
        match self.inner.take() {
            Some(tx) => {
                tx.rollback().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
