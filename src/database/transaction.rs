//! Multi-statement unit of work for the order repository.
//!
//! Dropping an open transaction rolls it back.

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

pub struct DatabaseTransaction {
    inner: Option<Transaction<'static, Postgres>>,
}

impl DatabaseTransaction {
    pub async fn begin(pool: &PgPool) -> DbResult<Self> {
        let inner = pool
            .begin()
            .await
            .map_err(|e| DatabaseError::from_sqlx(e).with_context("begin"))?;
        Ok(Self { inner: Some(inner) })
    }

    pub fn conn(&mut self) -> DbResult<&mut PgConnection> {
        self.inner.as_deref_mut().ok_or_else(finished)
    }

    pub async fn commit(mut self) -> DbResult<()> {
        let tx = self.inner.take().ok_or_else(finished)?;
        tx.commit().await.map_err(|e| {
            warn!("Commit failed: {}", e);
            DatabaseError::from_sqlx(e).with_context("commit")
        })
    }

    pub async fn rollback(mut self) -> DbResult<()> {
        let tx = self.inner.take().ok_or_else(finished)?;
        debug!("Rolling back");
        tx.rollback()
            .await
            .map_err(|e| DatabaseError::from_sqlx(e).with_context("rollback"))
    }
}

fn finished() -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Transaction {
        message: "already committed or rolled back".to_string(),
    })
}
