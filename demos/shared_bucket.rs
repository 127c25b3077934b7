//! Several limiter handles standing in for separate service instances, all sharing one bucket.
//!
//! Run with `cargo run --example shared_bucket`.

use smoothgate::{InMemoryPermitStore, LimiterContext, LocalLock, RateLimiter};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let store = InMemoryPermitStore::new();
    let lock = LocalLock::new().with_timeout(Duration::from_secs(1));
    let started = Instant::now();

    let mut instances = Vec::new();
    for id in 0..3 {
        let ctx = LimiterContext::new("demo:orders", store.clone(), lock.clone());
        let limiter = RateLimiter::warming_up(ctx, 20.0, Duration::from_secs(1), 3.0)?;
        instances.push(tokio::spawn(async move {
            for n in 0..10 {
                let waited = limiter.acquire(1).await?;
                tracing::info!(instance = id, request = n, waited_ms = waited.as_millis() as u64, "served");
            }
            Ok::<_, smoothgate::LimiterError>(())
        }));
    }
    for instance in instances {
        instance.await??;
    }

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(elapsed_s = elapsed, observed_rate = 30.0 / elapsed, "done");
    Ok(())
}
