use criterion::{Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use txscope::prelude::*;
use txscope::test_utils::mock::{MockDriver, MockTx};

async fn nest(
    conn: &Conn<MockDriver>,
    ctx: &Ctx<MockTx>,
    depth: usize,
) -> Result<(), TxScopeError> {
    if depth == 0 {
        let token = tx(ctx).ok_or(TxScopeError::TxClosedError)?;
        token.lock().await?.execute("SELECT 1");
        return Ok(());
    }
    conn.with_tx(ctx, |tx_ctx| async move {
        Box::pin(nest(conn, &tx_ctx, depth - 1)).await
    })
    .await
}

fn bench_with_tx(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create tokio runtime");
    let conn: Conn<MockDriver> = rt
        .block_on(Conn::open(&Ctx::background(), &ConnParams::new("mock://bench")))
        .expect("mock connection");

    let mut group = c.benchmark_group("with_tx");
    for depth in [1_usize, 4, 16] {
        group.bench_function(format!("depth_{depth}"), |b| {
            b.to_async(&rt).iter(|| async {
                nest(&conn, &Ctx::background(), depth)
                    .await
                    .expect("scope failed");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_with_tx);
criterion_main!(benches);
