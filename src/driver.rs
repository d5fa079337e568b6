use async_trait::async_trait;

use crate::config::ConnParams;
use crate::error::TxScopeError;

/// A pooled, transaction-capable database handle.
///
/// [`Conn`](crate::Conn) owns one of these and layers the closed flag,
/// context cancellation and transaction scoping on top. Implementations map
/// their failures onto the matching `TxScopeError` variant: `ping` reports
/// `ConnectivityError`, `begin` reports `TransactionError`, and
/// `load_extension` reports `ExtensionError`.
#[async_trait]
pub trait Driver: Send + Sync + Sized + 'static {
    /// The raw pool object exposed through [`Conn::pool`](crate::Conn::pool).
    /// Cloning it must be cheap; clones share the same connections.
    type Pool: Clone + Send + Sync;
    /// Transaction handed out by [`Driver::begin`].
    type Tx: RawTx;

    /// Build the pool. Must not touch the network; reachability is checked
    /// afterwards with [`Driver::ping`].
    ///
    /// # Errors
    /// Returns `TxScopeError::ConfigError` when `params` cannot be understood by the driver.
    fn connect(params: &ConnParams) -> Result<Self, TxScopeError>;

    /// Round trip against the pool.
    async fn ping(&self) -> Result<(), TxScopeError>;

    /// Make sure `name` is installed in the target database.
    async fn load_extension(&self, name: &str) -> Result<(), TxScopeError>;

    /// Check out a connection and open a transaction on it.
    async fn begin(&self) -> Result<Self::Tx, TxScopeError>;

    /// The live pool, or `None` once [`Driver::close`] released it.
    fn pool(&self) -> Option<Self::Pool>;

    /// Release the pool: idle connections are dropped and no new ones are
    /// handed out. Connections checked out by open transactions stay with
    /// their transaction until it finishes.
    fn close(&self);
}

/// An open transaction owned by exactly one [`TxToken`](crate::TxToken).
#[async_trait]
pub trait RawTx: Send + Sized + 'static {
    async fn commit(self) -> Result<(), TxScopeError>;

    async fn rollback(self) -> Result<(), TxScopeError>;
}
