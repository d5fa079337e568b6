//! Request-scoped context threaded through call chains.
//!
//! A [`Ctx`] is immutable: deriving a context (attaching a transaction,
//! adding a deadline, adding a cancellation scope) produces a new value and
//! leaves the parent untouched. Clones share the same underlying node and
//! compare equal; derived contexts never compare equal to their parent.

use std::fmt;
use std::future::{Future, poll_fn};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::driver::RawTx;
use crate::error::TxScopeError;
use crate::scope::TxToken;

pub struct Ctx<T: RawTx> {
    inner: Arc<CtxInner<T>>,
}

struct CtxInner<T: RawTx> {
    tx: Option<Arc<TxToken<T>>>,
    cancel: CancellationToken,
    // External tokens attached with `with_cancellation_token`.
    links: Vec<CancellationToken>,
    deadline: Option<Instant>,
}

impl<T: RawTx> Ctx<T> {
    /// Root context: no transaction, never cancelled, no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::from_inner(CtxInner {
            tx: None,
            cancel: CancellationToken::new(),
            links: Vec::new(),
            deadline: None,
        })
    }

    /// Derive a context that is cancelled when the returned token is
    /// cancelled or when this context is.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let cancel = self.inner.cancel.child_token();
        let derived = self.derive(self.inner.tx.clone(), cancel.clone(), self.inner.deadline);
        (derived, cancel)
    }

    /// Derive a context that is also cancelled by an externally owned
    /// `token`, for instance a server shutdown signal. The link is carried
    /// by the context itself and disappears with it.
    #[must_use]
    pub fn with_cancellation_token(&self, token: &CancellationToken) -> Self {
        let mut links = self.inner.links.clone();
        links.push(token.clone());
        Self::from_inner(CtxInner {
            tx: self.inner.tx.clone(),
            cancel: self.inner.cancel.clone(),
            links,
            deadline: self.inner.deadline,
        })
    }

    /// Derive a context whose deadline is `timeout` from now, or this
    /// context's deadline if that is earlier.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        self.derive(
            self.inner.tx.clone(),
            self.inner.cancel.clone(),
            Some(deadline),
        )
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Why this context is done, if it is.
    #[must_use]
    pub fn err(&self) -> Option<TxScopeError> {
        if self.tokens().any(CancellationToken::is_cancelled) {
            return Some(TxScopeError::Canceled);
        }
        match self.inner.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(TxScopeError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` until it completes or this context is cancelled or
    /// reaches its deadline, whichever happens first. `fut` is dropped
    /// unfinished in the latter case.
    ///
    /// # Errors
    /// Returns `TxScopeError::Canceled` or `TxScopeError::DeadlineExceeded` when the context ends
    /// first, otherwise whatever `fut` returns.
    pub async fn run<F, O>(&self, fut: F) -> Result<O, TxScopeError>
    where
        F: Future<Output = Result<O, TxScopeError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        match self.inner.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancelled() => Err(TxScopeError::Canceled),
                () = tokio::time::sleep_until(deadline) => Err(TxScopeError::DeadlineExceeded),
                out = fut => out,
            },
            None => tokio::select! {
                biased;
                () = self.cancelled() => Err(TxScopeError::Canceled),
                out = fut => out,
            },
        }
    }

    fn tokens(&self) -> impl Iterator<Item = &CancellationToken> {
        std::iter::once(&self.inner.cancel).chain(&self.inner.links)
    }

    /// Resolves once this context's own token or any linked token is cancelled.
    async fn cancelled(&self) {
        let mut waits: Vec<_> = self
            .tokens()
            .map(|token| Box::pin(token.cancelled()))
            .collect();
        poll_fn(|cx| {
            if waits.iter_mut().any(|wait| wait.as_mut().poll(cx).is_ready()) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
    }

    pub(crate) fn token(&self) -> Option<&Arc<TxToken<T>>> {
        self.inner.tx.as_ref()
    }

    pub(crate) fn with_token(&self, token: Arc<TxToken<T>>) -> Self {
        self.derive(Some(token), self.inner.cancel.clone(), self.inner.deadline)
    }

    fn derive(
        &self,
        tx: Option<Arc<TxToken<T>>>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self::from_inner(CtxInner {
            tx,
            cancel,
            links: self.inner.links.clone(),
            deadline,
        })
    }

    fn from_inner(inner: CtxInner<T>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<T: RawTx> Clone for Ctx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RawTx> PartialEq for Ctx<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: RawTx> Eq for Ctx<T> {}

impl<T: RawTx> fmt::Debug for Ctx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("tx", &self.inner.tx.as_ref().map(|token| token.id()))
            .field("cancelled", &self.is_cancelled())
            .field("links", &self.inner.links.len())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
