use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{ConnParams, POSTGIS_EXTENSION};
use crate::context::Ctx;
use crate::driver::Driver;
use crate::error::TxScopeError;
use crate::scope::{self, TxToken};

/// A pooled database handle that hands out context-scoped transactions.
pub struct Conn<D: Driver> {
    driver: D,
    closed: AtomicBool,
}

impl<D: Driver> Conn<D> {
    /// Build the pool described by `params`, check that it is reachable and,
    /// when requested, that PostGIS is available.
    ///
    /// # Errors
    /// Returns `TxScopeError::ConfigError` for unusable parameters,
    /// `TxScopeError::ConnectivityError` when the target cannot be reached,
    /// `TxScopeError::ExtensionError` when PostGIS cannot be loaded, or a
    /// cancellation error from `ctx`. No handle is returned on failure.
    pub async fn open(ctx: &Ctx<D::Tx>, params: &ConnParams) -> Result<Self, TxScopeError> {
        params.validate()?;
        let driver = D::connect(params)?;

        if let Err(err) = ctx.run(driver.ping()).await {
            driver.close();
            return Err(err);
        }
        if params.enable_postgis
            && let Err(err) = ctx.run(driver.load_extension(POSTGIS_EXTENSION)).await
        {
            driver.close();
            return Err(err);
        }

        tracing::info!(
            max_size = params.max_size,
            postgis = params.enable_postgis,
            "connection pool opened"
        );
        Ok(Self::from_driver(driver))
    }

    /// Wrap an already constructed driver without any checks.
    #[must_use]
    pub fn from_driver(driver: D) -> Self {
        Self {
            driver,
            closed: AtomicBool::new(false),
        }
    }

    /// # Errors
    /// Returns `TxScopeError::ClosedError` after [`Conn::close`], otherwise
    /// `TxScopeError::ConnectivityError` or a cancellation error from `ctx`.
    pub async fn ping(&self, ctx: &Ctx<D::Tx>) -> Result<(), TxScopeError> {
        self.ensure_open()?;
        ctx.run(self.driver.ping()).await?;
        tracing::debug!("ping ok");
        Ok(())
    }

    /// Release the pool. Every later operation on this handle fails with
    /// `ClosedError`; transactions already begun are left to the driver.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::warn!("close called on an already closed connection");
            return;
        }
        self.driver.close();
        tracing::info!("connection pool closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The transaction-capable driver behind this handle.
    #[must_use]
    pub fn handle(&self) -> &D {
        &self.driver
    }

    /// The raw pool, or `None` after [`Conn::close`].
    #[must_use]
    pub fn pool(&self) -> Option<D::Pool> {
        if self.is_closed() {
            return None;
        }
        self.driver.pool()
    }

    /// Attach a new transaction to `ctx`, or return `ctx` itself when it
    /// already carries one. The returned context compares equal to `ctx` in
    /// the latter case.
    ///
    /// # Errors
    /// Returns `TxScopeError::ClosedError` after [`Conn::close`],
    /// `TxScopeError::TransactionError` if the driver cannot open a
    /// transaction, or a cancellation error from `ctx`. `ctx` itself is never
    /// modified.
    pub async fn begin_tx(&self, ctx: &Ctx<D::Tx>) -> Result<Ctx<D::Tx>, TxScopeError> {
        if let Some(token) = ctx.token() {
            tracing::debug!(tx_id = token.id(), "joining enclosing transaction");
            return Ok(ctx.clone());
        }
        self.ensure_open()?;
        let raw = ctx.run(self.driver.begin()).await?;
        let token = Arc::new(TxToken::new(raw));
        tracing::debug!(tx_id = token.id(), "transaction started");
        Ok(ctx.with_token(token))
    }

    /// Run `f` in a transaction; see [`with_tx`](crate::with_tx).
    ///
    /// # Errors
    /// Returns `f`'s error unchanged, or a `TxScopeError` (converted into `E`)
    /// from beginning or committing the transaction.
    pub async fn with_tx<F, Fut, E>(&self, ctx: &Ctx<D::Tx>, f: F) -> Result<(), E>
    where
        F: FnOnce(Ctx<D::Tx>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<TxScopeError>,
    {
        scope::with_tx(ctx, self, f).await
    }

    fn ensure_open(&self) -> Result<(), TxScopeError> {
        if self.is_closed() {
            return Err(TxScopeError::ClosedError);
        }
        Ok(())
    }
}

impl<D: Driver> fmt::Debug for Conn<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock::MockDriver;

    #[tokio::test]
    async fn begin_after_close_fails_closed() {
        let ctx = Ctx::background();
        let conn: Conn<MockDriver> = Conn::open(&ctx, &ConnParams::new("mock://db"))
            .await
            .unwrap();
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(conn.handle().state().is_closed());
        assert!(conn.pool().is_none());
        assert!(conn.begin_tx(&ctx).await.unwrap_err().is_closed());
        assert!(conn.ping(&ctx).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn failed_open_releases_driver() {
        let ctx = Ctx::background();
        let err = Conn::<MockDriver>::open(&ctx, &ConnParams::new("mock://unreachable"))
            .await
            .unwrap_err();
        assert!(matches!(err, TxScopeError::ConnectivityError(_)));
    }
}
