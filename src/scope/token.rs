use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::driver::RawTx;
use crate::error::TxScopeError;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to the single in-flight transaction of a call chain.
///
/// The raw transaction lives behind an async mutex so statements issued
/// through clones of the same context are serialized. Committing or rolling
/// back removes it; afterwards [`TxToken::lock`] and further finalization
/// fail with `TxClosedError`.
pub struct TxToken<T: RawTx> {
    id: u64,
    raw: Mutex<Option<T>>,
}

impl<T: RawTx> TxToken<T> {
    pub(crate) fn new(raw: T) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            raw: Mutex::new(Some(raw)),
        }
    }

    /// Process-unique identifier, stable for the token's lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the raw transaction to issue statements.
    ///
    /// # Errors
    /// Returns `TxScopeError::TxClosedError` if the transaction was already
    /// committed or rolled back.
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, T>, TxScopeError> {
        MutexGuard::try_map(self.raw.lock().await, Option::as_mut)
            .map_err(|_| TxScopeError::TxClosedError)
    }

    /// True once commit or rollback has taken the raw transaction. A token
    /// that is currently locked by a statement reports `false`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.raw.try_lock().is_ok_and(|slot| slot.is_none())
    }

    pub(crate) async fn commit(&self) -> Result<(), TxScopeError> {
        let raw = self.take().await?;
        raw.commit().await
    }

    pub(crate) async fn rollback(&self) -> Result<(), TxScopeError> {
        let raw = self.take().await?;
        raw.rollback().await
    }

    /// Hand the transaction to a background rollback without waiting.
    pub(crate) fn abandon(&self) {
        if let Ok(mut slot) = self.raw.try_lock()
            && let Some(raw) = slot.take()
        {
            tracing::warn!(tx_id = self.id, "transaction scope exited abnormally; rolling back");
            spawn_rollback(self.id, raw);
        }
    }

    async fn take(&self) -> Result<T, TxScopeError> {
        self.raw
            .lock()
            .await
            .take()
            .ok_or(TxScopeError::TxClosedError)
    }
}

fn spawn_rollback<T: RawTx>(tx_id: u64, raw: T) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = raw.rollback().await {
                    tracing::warn!(tx_id, error = %err, "background rollback failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!(tx_id, "no tokio runtime available; leaving rollback to the driver");
        }
    }
}

impl<T: RawTx> Drop for TxToken<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.get_mut().take() {
            tracing::warn!(tx_id = self.id, "transaction dropped without commit or rollback");
            spawn_rollback(self.id, raw);
        }
    }
}

impl<T: RawTx> PartialEq for TxToken<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: RawTx> Eq for TxToken<T> {}

impl<T: RawTx> fmt::Debug for TxToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxToken")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::mock::{MockState, MockTx};

    #[tokio::test]
    async fn commit_finishes_token_once() {
        let state = Arc::new(MockState::default());
        let token = TxToken::new(MockTx::new(Arc::clone(&state)));
        assert!(!token.is_finished());

        token.commit().await.unwrap();
        assert!(token.is_finished());
        assert_eq!(state.committed(), 1);

        let err = token.commit().await.unwrap_err();
        assert!(matches!(err, TxScopeError::TxClosedError));
        let err = token.rollback().await.unwrap_err();
        assert!(matches!(err, TxScopeError::TxClosedError));
        assert!(matches!(token.lock().await, Err(TxScopeError::TxClosedError)));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let state = Arc::new(MockState::default());
        let first = TxToken::new(MockTx::new(Arc::clone(&state)));
        let second = TxToken::new(MockTx::new(Arc::clone(&state)));
        assert_ne!(first.id(), second.id());
        assert_ne!(first, second);
        first.rollback().await.unwrap();
        second.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_unfinished_token_rolls_back() {
        let state = Arc::new(MockState::default());
        drop(TxToken::new(MockTx::new(Arc::clone(&state))));
        for _ in 0..100 {
            if state.rolled_back() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(state.rolled_back(), 1);
        assert_eq!(state.committed(), 0);
    }
}
