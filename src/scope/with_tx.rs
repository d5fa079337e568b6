use std::future::Future;
use std::sync::Arc;

use crate::conn::Conn;
use crate::context::Ctx;
use crate::driver::{Driver, RawTx};
use crate::error::TxScopeError;

use super::{TxToken, commit_tx, in_tx, rollback_tx};

/// Run `f` inside a transaction and return its result.
///
/// When `ctx` already carries a transaction, `f` joins it and nothing is
/// committed or rolled back here; the scope that opened the transaction
/// decides. Otherwise a transaction is opened, `f` runs with the derived
/// context, and the transaction is committed if `f` succeeds or rolled back
/// if it fails. A commit failure replaces `f`'s result. If `f` panics or the
/// returned future is dropped before completion, the transaction is rolled
/// back in the background.
///
/// # Errors
/// Returns `f`'s error unchanged, or a `TxScopeError` (converted into `E`)
/// from beginning or committing the transaction.
pub async fn with_tx<D, F, Fut, R, E>(ctx: &Ctx<D::Tx>, conn: &Conn<D>, f: F) -> Result<R, E>
where
    D: Driver,
    F: FnOnce(Ctx<D::Tx>) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<TxScopeError>,
{
    let owner = !in_tx(ctx);
    let tx_ctx = conn.begin_tx(ctx).await?;
    if !owner {
        return f(tx_ctx).await;
    }

    let mut guard = RollbackGuard::arm(tx_ctx.token());
    let result = f(tx_ctx.clone()).await;
    guard.disarm();

    match result {
        Ok(value) => {
            commit_tx(&tx_ctx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = rollback_tx(&tx_ctx).await {
                tracing::warn!(
                    error = %rollback_err,
                    "rollback after failed transaction scope failed"
                );
            }
            Err(err)
        }
    }
}

/// Rolls the transaction back if dropped while still armed.
struct RollbackGuard<T: RawTx> {
    token: Option<Arc<TxToken<T>>>,
}

impl<T: RawTx> RollbackGuard<T> {
    fn arm(token: Option<&Arc<TxToken<T>>>) -> Self {
        Self {
            token: token.cloned(),
        }
    }

    fn disarm(&mut self) {
        self.token = None;
    }
}

impl<T: RawTx> Drop for RollbackGuard<T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.abandon();
        }
    }
}
