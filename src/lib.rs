//! Context-scoped transactions over a pooled database connection.
//!
//! A [`Conn`] wraps a pooled [`Driver`]. Transactions are attached to an
//! immutable [`Ctx`] that is passed down the call chain: nested requests for
//! a transaction collapse onto the one already carried by the context, so
//! library code can wrap its work in [`with_tx`] without knowing whether a
//! caller already opened a transaction. Only the scope that actually began
//! the transaction commits or rolls it back.
//!
//! ```rust,no_run
//! use txscope::prelude::*;
//!
//! # async fn example() -> Result<(), TxScopeError> {
//! let ctx = Ctx::background();
//! let conn: Conn<PgDriver> =
//!     Conn::open(&ctx, &ConnParams::new("postgres://app@localhost/app")).await?;
//!
//! let id = with_tx(&ctx, &conn, |ctx| async move {
//!     let token = tx(&ctx).ok_or(TxScopeError::TxClosedError)?;
//!     let raw = token.lock().await?;
//!     let row = raw
//!         .query_opt("INSERT INTO users (name) VALUES ($1) RETURNING id", &[&"alice"])
//!         .await?;
//!     Ok::<_, TxScopeError>(row.map(|row| row.get::<_, i64>(0)))
//! })
//! .await?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conn;
pub mod context;
pub mod driver;
pub mod error;
pub mod prelude;
pub mod scope;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConnParams, POSTGIS_EXTENSION};
pub use conn::Conn;
pub use context::Ctx;
pub use driver::{Driver, RawTx};
pub use error::TxScopeError;
pub use scope::{TxToken, commit_tx, in_tx, rollback_tx, tx, with_tx};

#[cfg(feature = "postgres")]
pub use postgres::{PgDriver, PgTx};
