use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bb8::{ManageConnection, Pool};
use tokio_postgres::{Client, NoTls};

use crate::error::TxScopeError;

/// bb8 manager for Postgres clients.
///
/// Once the shared closed flag is set, new connections are refused and
/// checked-in connections are reported broken so the pool discards them.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
    closed: Arc<AtomicBool>,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self {
            config,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Build a pool from this manager without opening any connection.
    #[must_use]
    pub fn build_pool(
        self,
        max_size: u32,
        connection_timeout: std::time::Duration,
    ) -> Pool<PgManager> {
        Pool::builder()
            .max_size(max_size)
            .connection_timeout(connection_timeout)
            .build_unchecked(self)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = TxScopeError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        let closed = self.is_closed();
        async move {
            if closed {
                return Err(TxScopeError::ClosedError);
            }
            tracing::debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "postgres connect start"
            );
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::debug!(error = %err, "postgres connection task ended");
                }
            });
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let closed = self.is_closed();
        async move {
            if closed {
                return Err(TxScopeError::ClosedError);
            }
            conn.simple_query("SELECT 1").await?;
            Ok(())
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.is_closed() || conn.is_closed()
    }
}
