//! Transaction propagation through [`Ctx`].
//!
//! A context is either outside a transaction or carries exactly one
//! [`TxToken`]. [`Conn::begin_tx`](crate::Conn::begin_tx) attaches a token
//! (or returns the context unchanged when one is already attached), and the
//! functions here read it back or finalize it. Finalizing does not detach the
//! token from the context; callers drop the transactional context afterwards.

mod token;
mod with_tx;

use std::sync::Arc;

pub use token::TxToken;
pub use with_tx::with_tx;

use crate::context::Ctx;
use crate::driver::RawTx;
use crate::error::TxScopeError;

/// Whether `ctx` carries a transaction.
#[must_use]
pub fn in_tx<T: RawTx>(ctx: &Ctx<T>) -> bool {
    ctx.token().is_some()
}

/// The transaction carried by `ctx`, if any.
#[must_use]
pub fn tx<T: RawTx>(ctx: &Ctx<T>) -> Option<Arc<TxToken<T>>> {
    ctx.token().cloned()
}

/// Commit the transaction carried by `ctx`. Succeeds without doing anything
/// when `ctx` carries none.
///
/// # Errors
/// Returns `TxScopeError::CommitError` if the driver rejects the commit,
/// `TxScopeError::TxClosedError` if the transaction was already finalized, or
/// a cancellation error from `ctx`.
pub async fn commit_tx<T: RawTx>(ctx: &Ctx<T>) -> Result<(), TxScopeError> {
    let Some(token) = ctx.token() else {
        return Ok(());
    };
    ctx.run(token.commit()).await?;
    tracing::debug!(tx_id = token.id(), "transaction committed");
    Ok(())
}

/// Roll back the transaction carried by `ctx`. Succeeds without doing
/// anything when `ctx` carries none.
///
/// # Errors
/// Returns `TxScopeError::RollbackError` if the driver rejects the rollback,
/// `TxScopeError::TxClosedError` if the transaction was already finalized, or
/// a cancellation error from `ctx`.
pub async fn rollback_tx<T: RawTx>(ctx: &Ctx<T>) -> Result<(), TxScopeError> {
    let Some(token) = ctx.token() else {
        return Ok(());
    };
    ctx.run(token.rollback()).await?;
    tracing::debug!(tx_id = token.id(), "transaction rolled back");
    Ok(())
}
