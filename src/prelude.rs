//! Convenient imports for common functionality.

pub use crate::config::ConnParams;
pub use crate::conn::Conn;
pub use crate::context::Ctx;
pub use crate::driver::{Driver, RawTx};
pub use crate::error::TxScopeError;
pub use crate::scope::{TxToken, commit_tx, in_tx, rollback_tx, tx, with_tx};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PgDriver, PgTx};
