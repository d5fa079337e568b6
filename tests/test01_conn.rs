use txscope::prelude::*;
use txscope::test_utils::mock::{MockDriver, MockTx};

async fn open_mock(addr: &str) -> Result<Conn<MockDriver>, TxScopeError> {
    let ctx: Ctx<MockTx> = Ctx::background();
    Conn::open(&ctx, &ConnParams::new(addr)).await
}

#[tokio::test]
async fn test01_open_with_postgis_then_close() -> Result<(), TxScopeError> {
    let ctx = Ctx::background();
    let params = ConnParams::new("mock://db").with_postgis(true);
    let conn: Conn<MockDriver> = Conn::open(&ctx, &params).await?;

    conn.close();
    let err = conn.ping(&ctx).await.unwrap_err();
    assert!(err.is_closed());
    Ok(())
}

#[tokio::test]
async fn test01_open_without_postgis_ping_close() -> Result<(), TxScopeError> {
    let ctx = Ctx::background();
    let conn: Conn<MockDriver> = Conn::open(&ctx, &ConnParams::new("mock://plain")).await?;

    conn.ping(&ctx).await?;
    // One ping from open, one from the explicit call.
    assert_eq!(conn.handle().state().pings(), 2);

    let pool = conn.pool().expect("open pool");
    assert!(!pool.is_closed());
    drop(pool);

    conn.close();
    assert!(conn.pool().is_none());
    assert!(conn.handle().state().is_closed());
    assert!(matches!(
        conn.ping(&ctx).await,
        Err(TxScopeError::ClosedError)
    ));
    Ok(())
}

#[tokio::test]
async fn test01_invalid_params() {
    let err = open_mock("invalid-connection-string").await.unwrap_err();
    assert!(matches!(err, TxScopeError::ConfigError(_)));

    let err = open_mock("").await.unwrap_err();
    assert!(matches!(err, TxScopeError::ConfigError(_)));
}

#[tokio::test]
async fn test01_unreachable_target() {
    let err = open_mock("mock://unreachable").await.unwrap_err();
    assert!(matches!(err, TxScopeError::ConnectivityError(_)));
}

#[tokio::test]
async fn test01_missing_extension() {
    let ctx = Ctx::background();
    let params = ConnParams::new("mock://plain").with_postgis(true);
    let err = Conn::<MockDriver>::open(&ctx, &params).await.unwrap_err();
    assert!(matches!(err, TxScopeError::ExtensionError(_)));
}

#[tokio::test]
async fn test01_ping_reports_lost_connectivity() -> Result<(), TxScopeError> {
    let ctx = Ctx::background();
    let conn = open_mock("mock://db").await?;
    conn.handle().state().set_unreachable(true);
    assert!(matches!(
        conn.ping(&ctx).await,
        Err(TxScopeError::ConnectivityError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test01_cancelled_open() {
    let (ctx, cancel) = Ctx::<MockTx>::background().with_cancel();
    cancel.cancel();
    let err = Conn::<MockDriver>::open(&ctx, &ConnParams::new("mock://db"))
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
}

#[test]
fn test01_params_from_json() {
    let params: ConnParams = serde_json::from_str(
        r#"{"addr": "postgres://app@localhost/app", "enable_postgis": true}"#,
    )
    .unwrap();
    assert_eq!(params.addr, "postgres://app@localhost/app");
    assert!(params.enable_postgis);
    assert_eq!(params.max_size, 10);
    assert_eq!(params.connect_timeout_ms, 30_000);
}

#[cfg(feature = "postgres")]
mod postgres {
    use std::time::Duration;

    use txscope::prelude::*;

    #[tokio::test]
    async fn test01_pg_invalid_params() {
        let ctx = Ctx::background();
        let err = Conn::<PgDriver>::open(&ctx, &ConnParams::new("invalid-connection-string"))
            .await
            .unwrap_err();
        assert!(matches!(err, TxScopeError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test01_pg_unreachable_target() {
        let ctx = Ctx::background();
        let params = ConnParams::new("postgres://nobody@127.0.0.1:1/nothing")
            .with_connect_timeout(Duration::from_millis(500));
        let err = Conn::<PgDriver>::open(&ctx, &params).await.unwrap_err();
        assert!(
            matches!(err, TxScopeError::ConnectivityError(_)),
            "unexpected error: {err:?}"
        );
    }
}
