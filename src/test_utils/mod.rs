//! Helpers for testing code built on this crate.

/// Driver double with failure injection.
pub mod mock;

/// Embedded `PostgreSQL` shared by integration tests.
#[cfg(feature = "test-utils-postgres")]
pub mod postgres;
