use std::future::Future;
use std::sync::{LazyLock, OnceLock};

use postgresql_embedded::PostgreSQL;
use tokio::runtime::Runtime;

use crate::config::ConnParams;
use crate::conn::Conn;
use crate::context::Ctx;
use crate::error::TxScopeError;
use crate::postgres::PgDriver;

/// Database created inside the embedded server for tests.
pub const TEST_DB_NAME: &str = "txscope_test";

/// Runtime that owns the embedded server's setup work, separate from the
/// per-test runtimes created by `#[tokio::test]`.
static SHARED_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("Failed to create tokio runtime for test utilities"));

static SHARED_DB: OnceLock<EmbeddedPostgres> = OnceLock::new();

/// A running embedded `PostgreSQL` instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub database_url: String,
}

/// Start an embedded `PostgreSQL` server and create `db_name` in it.
///
/// # Errors
/// Returns an error if the server cannot be set up or started, or if the
/// database cannot be created.
///
/// # Panics
/// Panics if called from inside an async runtime; use [`run_with_conn`] from async tests.
pub fn setup_postgres_embedded(
    db_name: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();
        postgresql.setup().await?;
        postgresql.start().await?;
        postgresql.create_database(db_name).await?;

        let settings = postgresql.settings();
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{db_name}",
            settings.username, settings.password, settings.host, settings.port
        );
        tracing::info!(port = settings.port, "embedded postgres started");

        Ok::<_, Box<dyn std::error::Error>>(EmbeddedPostgres {
            postgresql,
            database_url,
        })
    })
}

/// URL of the server shared by every test in the process, started on first use.
///
/// # Panics
/// Panics if the embedded server cannot be started.
#[must_use]
pub fn shared_database_url() -> &'static str {
    &SHARED_DB
        .get_or_init(|| {
            setup_postgres_embedded(TEST_DB_NAME).expect("could not start embedded postgres")
        })
        .database_url
}

/// Open a connection to the shared test database and hand it to `f`.
///
/// # Errors
/// Returns whatever opening the connection or `f` returns.
///
/// # Panics
/// Panics if the embedded server cannot be started.
pub async fn run_with_conn<F, Fut, E>(f: F) -> Result<(), E>
where
    F: FnOnce(Conn<PgDriver>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<TxScopeError>,
{
    let url = tokio::task::spawn_blocking(|| shared_database_url().to_string())
        .await
        .expect("embedded postgres setup task panicked");
    let ctx = Ctx::background();
    let conn = Conn::open(&ctx, &ConnParams::new(url)).await?;
    f(conn).await
}
