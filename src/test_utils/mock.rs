//! In-memory driver for exercising transaction scoping without a database.
//!
//! Addresses use the `mock://<host>` scheme. The host `unreachable` fails
//! every ping and the host `plain` has no extensions installed; any other
//! host behaves like a healthy server with PostGIS available.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConnParams, POSTGIS_EXTENSION};
use crate::driver::{Driver, RawTx};
use crate::error::TxScopeError;

const SCHEME: &str = "mock://";

/// Counters and failure switches shared by a [`MockDriver`] and every
/// [`MockTx`] it hands out.
#[derive(Debug, Default)]
pub struct MockState {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    committed_statements: AtomicUsize,
    pings: AtomicUsize,
    unreachable: AtomicBool,
    without_extensions: AtomicBool,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    begin_delay_ms: AtomicU64,
    closed: AtomicBool,
}

impl MockState {
    #[must_use]
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    /// Transactions begun but neither committed nor rolled back yet.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.begun()
            .saturating_sub(self.committed())
            .saturating_sub(self.rolled_back())
    }

    /// Statements that became durable through a successful commit.
    #[must_use]
    pub fn committed_statements(&self) -> usize {
        self.committed_statements.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Make every `begin` wait this long before succeeding.
    pub fn set_begin_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.begin_delay_ms.store(millis, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    #[must_use]
    pub fn new(state: Arc<MockState>) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<MockState> {
        &self.state
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Pool = Arc<MockState>;
    type Tx = MockTx;

    fn connect(params: &ConnParams) -> Result<Self, TxScopeError> {
        let Some(rest) = params.addr.strip_prefix(SCHEME) else {
            return Err(TxScopeError::ConfigError(format!(
                "unsupported address: {}",
                params.addr
            )));
        };
        let host = rest.split(['/', '?']).next().unwrap_or_default();
        if host.is_empty() {
            return Err(TxScopeError::ConfigError("host is required".to_string()));
        }

        let state = MockState::default();
        state.set_unreachable(host == "unreachable");
        state.without_extensions.store(host == "plain", Ordering::SeqCst);
        Ok(Self::new(Arc::new(state)))
    }

    async fn ping(&self) -> Result<(), TxScopeError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(TxScopeError::ConnectivityError(
                "mock host is unreachable".to_string(),
            ));
        }
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_extension(&self, name: &str) -> Result<(), TxScopeError> {
        if name == POSTGIS_EXTENSION && !self.state.without_extensions.load(Ordering::SeqCst) {
            return Ok(());
        }
        Err(TxScopeError::ExtensionError(format!(
            "extension {name} is not available"
        )))
    }

    async fn begin(&self) -> Result<MockTx, TxScopeError> {
        let delay = self.state.begin_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_begin.load(Ordering::SeqCst) {
            return Err(TxScopeError::TransactionError(
                "mock begin failure".to_string(),
            ));
        }
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        Ok(MockTx::new(Arc::clone(&self.state)))
    }

    fn pool(&self) -> Option<Arc<MockState>> {
        (!self.state.is_closed()).then(|| Arc::clone(&self.state))
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// Transaction that counts statements and reports its outcome to [`MockState`].
#[derive(Debug)]
pub struct MockTx {
    state: Arc<MockState>,
    statements: usize,
}

impl MockTx {
    #[must_use]
    pub fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            statements: 0,
        }
    }

    /// Record a statement; it only counts as committed if the transaction commits.
    pub fn execute(&mut self, _sql: &str) {
        self.statements += 1;
    }

    #[must_use]
    pub fn statements(&self) -> usize {
        self.statements
    }
}

#[async_trait]
impl RawTx for MockTx {
    async fn commit(self) -> Result<(), TxScopeError> {
        if self.state.fail_commit.load(Ordering::SeqCst) {
            // The server aborts a transaction whose commit fails.
            self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
            return Err(TxScopeError::CommitError("mock commit failure".to_string()));
        }
        self.state
            .committed_statements
            .fetch_add(self.statements, Ordering::SeqCst);
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), TxScopeError> {
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(TxScopeError::RollbackError(
                "mock rollback failure".to_string(),
            ));
        }
        Ok(())
    }
}
