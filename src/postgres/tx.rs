use async_trait::async_trait;
use bb8::PooledConnection;
use tokio::runtime::Handle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::driver::RawTx;
use crate::error::TxScopeError;

use super::manager::PgManager;

/// A pooled Postgres client with an explicit `BEGIN` in flight.
///
/// The client goes back to the pool on commit or rollback. Dropping an
/// unfinished `PgTx` schedules a `ROLLBACK` on the current tokio runtime
/// before the client is recycled.
pub struct PgTx {
    conn: Option<PooledConnection<'static, PgManager>>,
}

impl PgTx {
    pub(crate) async fn begin(
        conn: PooledConnection<'static, PgManager>,
    ) -> Result<Self, TxScopeError> {
        let mut tx = Self { conn: Some(conn) };
        let begun = tx.client()?.simple_query("BEGIN").await;
        if let Err(err) = begun {
            // Nothing to roll back; return the client to the pool as-is.
            tx.conn.take();
            return Err(TxScopeError::TransactionError(format!(
                "postgres begin error: {err}"
            )));
        }
        Ok(tx)
    }

    /// The underlying client, for statements the helpers below don't cover.
    ///
    /// # Errors
    /// Returns `TxScopeError::TxClosedError` if the transaction already finished.
    pub fn client(&self) -> Result<&Client, TxScopeError> {
        self.conn.as_deref().ok_or(TxScopeError::TxClosedError)
    }

    /// Execute one or more statements without parameters.
    ///
    /// # Errors
    /// Returns `TxScopeError::PostgresError` if execution fails.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), TxScopeError> {
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    /// Execute a parameterized statement and return the affected row count.
    ///
    /// # Errors
    /// Returns `TxScopeError::PostgresError` if execution fails.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, TxScopeError> {
        Ok(self.client()?.execute(sql, params).await?)
    }

    /// # Errors
    /// Returns `TxScopeError::PostgresError` if the query fails.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, TxScopeError> {
        Ok(self.client()?.query(sql, params).await?)
    }

    /// # Errors
    /// Returns `TxScopeError::PostgresError` if the query fails or returns more than one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, TxScopeError> {
        Ok(self.client()?.query_opt(sql, params).await?)
    }

    async fn finish(
        &mut self,
        sql: &str,
        on_error: fn(String) -> TxScopeError,
    ) -> Result<(), TxScopeError> {
        let conn = self.conn.take().ok_or(TxScopeError::TxClosedError)?;
        match conn.simple_query(sql).await {
            Ok(_) => Ok(()),
            Err(err) => {
                // Best-effort rollback so the client is recycled outside a transaction.
                let _ = conn.simple_query("ROLLBACK").await;
                Err(on_error(format!("postgres {} error: {err}", sql.to_lowercase())))
            }
        }
    }
}

#[async_trait]
impl RawTx for PgTx {
    async fn commit(mut self) -> Result<(), TxScopeError> {
        self.finish("COMMIT", TxScopeError::CommitError).await
    }

    async fn rollback(mut self) -> Result<(), TxScopeError> {
        self.finish("ROLLBACK", TxScopeError::RollbackError).await
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                let _ = conn.simple_query("ROLLBACK").await;
            });
        }
    }
}
