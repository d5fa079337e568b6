use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxScopeError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connectivity error: {0}")]
    ConnectivityError(String),

    #[error("Extension error: {0}")]
    ExtensionError(String),

    #[error("connection is closed")]
    ClosedError,

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Commit error: {0}")]
    CommitError(String),

    #[error("Rollback error: {0}")]
    RollbackError(String),

    #[error("transaction already committed or rolled back")]
    TxClosedError,

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl TxScopeError {
    /// True when the operation was rejected because the connection was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, TxScopeError::ClosedError)
    }

    /// True for `Canceled` and `DeadlineExceeded`.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TxScopeError::Canceled | TxScopeError::DeadlineExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cancellation() {
        assert!(TxScopeError::Canceled.is_cancellation());
        assert!(TxScopeError::DeadlineExceeded.is_cancellation());
        assert!(!TxScopeError::ClosedError.is_cancellation());
        assert!(TxScopeError::ClosedError.is_closed());
    }

    #[test]
    fn messages_carry_detail() {
        let err = TxScopeError::CommitError("socket reset".into());
        assert_eq!(err.to_string(), "Commit error: socket reset");
    }
}
