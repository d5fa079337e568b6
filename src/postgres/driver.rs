use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bb8::Pool;

use crate::config::ConnParams;
use crate::driver::Driver;
use crate::error::TxScopeError;

use super::manager::PgManager;
use super::tx::PgTx;

/// bb8-backed Postgres driver.
///
/// The pool lives in a slot that [`Driver::close`] empties; dropping the
/// driver's handle drops every idle client along with its socket.
pub struct PgDriver {
    pool: Mutex<Option<Pool<PgManager>>>,
    closed: Arc<AtomicBool>,
}

impl PgDriver {
    /// Wrap a manager; the pool is built lazily and nothing is dialed yet.
    #[must_use]
    pub fn new(manager: PgManager, params: &ConnParams) -> Self {
        let closed = manager.closed_flag();
        let pool = manager.build_pool(params.max_size, params.connect_timeout());
        Self {
            pool: Mutex::new(Some(pool)),
            closed,
        }
    }

    fn live_pool(&self) -> Result<Pool<PgManager>, TxScopeError> {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TxScopeError::ClosedError)
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[async_trait]
impl Driver for PgDriver {
    type Pool = Pool<PgManager>;
    type Tx = PgTx;

    fn connect(params: &ConnParams) -> Result<Self, TxScopeError> {
        let mut config = tokio_postgres::Config::from_str(&params.addr).map_err(|e| {
            TxScopeError::ConfigError(format!("invalid postgres address: {e}"))
        })?;
        config.connect_timeout(params.connect_timeout());
        Ok(Self::new(PgManager::new(config), params))
    }

    async fn ping(&self) -> Result<(), TxScopeError> {
        let pool = self.live_pool()?;
        let conn = pool.get().await.map_err(|e| {
            TxScopeError::ConnectivityError(format!("postgres checkout error: {e}"))
        })?;
        conn.simple_query("SELECT 1").await.map_err(|e| {
            TxScopeError::ConnectivityError(format!("postgres ping error: {e}"))
        })?;
        Ok(())
    }

    async fn load_extension(&self, name: &str) -> Result<(), TxScopeError> {
        if !is_identifier(name) {
            return Err(TxScopeError::ExtensionError(format!(
                "invalid extension name: {name}"
            )));
        }
        let pool = self.live_pool()?;
        let conn = pool.get().await.map_err(|e| {
            TxScopeError::ExtensionError(format!("postgres checkout error: {e}"))
        })?;
        conn.batch_execute(&format!("CREATE EXTENSION IF NOT EXISTS \"{name}\""))
            .await
            .map_err(|e| {
                TxScopeError::ExtensionError(format!("could not create extension {name}: {e}"))
            })?;
        let row = conn
            .query_opt(
                "SELECT extversion FROM pg_extension WHERE extname = $1",
                &[&name],
            )
            .await
            .map_err(|e| {
                TxScopeError::ExtensionError(format!("could not verify extension {name}: {e}"))
            })?
            .ok_or_else(|| {
                TxScopeError::ExtensionError(format!("extension {name} is not installed"))
            })?;
        let version: String = row.try_get(0).map_err(|e| {
            TxScopeError::ExtensionError(format!("could not read {name} version: {e}"))
        })?;
        tracing::debug!(extension = name, %version, "extension verified");
        Ok(())
    }

    async fn begin(&self) -> Result<PgTx, TxScopeError> {
        let conn = self.live_pool()?.get_owned().await.map_err(|e| {
            TxScopeError::TransactionError(format!("postgres checkout error: {e}"))
        })?;
        PgTx::begin(conn).await
    }

    fn pool(&self) -> Option<Pool<PgManager>> {
        self.live_pool().ok()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let released = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = released {
            let idle = pool.state().idle_connections;
            drop(pool);
            tracing::debug!(idle, "postgres pool released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_names_are_plain_identifiers() {
        assert!(is_identifier("postgis"));
        assert!(is_identifier("postgis_topology"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("postgis\"; DROP TABLE t; --"));
    }

    #[tokio::test]
    async fn close_releases_the_pool() {
        let driver = PgDriver::connect(&ConnParams::new("postgres://nobody@127.0.0.1:1/nothing"))
            .expect("address parses");
        assert!(driver.pool().is_some());
        driver.close();
        assert!(driver.pool().is_none());
        assert!(driver.ping().await.unwrap_err().is_closed());
        assert!(matches!(driver.begin().await, Err(TxScopeError::ClosedError)));
    }

    #[test]
    fn unparsable_address_is_a_config_error() {
        let Err(err) = PgDriver::connect(&ConnParams::new("invalid-connection-string")) else {
            panic!("expected a configuration error");
        };
        assert!(matches!(err, TxScopeError::ConfigError(_)));
    }
}
