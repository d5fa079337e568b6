// Postgres driver - bb8 pool of tokio-postgres clients
//
// - manager: connection manager shared by the pool, owns the closed flag
// - driver: `Driver` impl (pool construction, ping, extensions, begin)
// - tx: `RawTx` impl with explicit BEGIN/COMMIT/ROLLBACK and statement helpers

pub mod driver;
pub mod manager;
pub mod tx;

pub use driver::PgDriver;
pub use manager::PgManager;
pub use tx::PgTx;
