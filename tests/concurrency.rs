mod common;

use common::{Fixture, START};
use smoothgate::{InstantSleeper, RateLimiter, Sleeper};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handles_never_double_spend() {
    let fx = Fixture::new();
    let handles: Vec<RateLimiter> = (0..3)
        .map(|_| RateLimiter::bursty(fx.frozen_ctx("pool", InstantSleeper), 10.0, 1.0).unwrap())
        .collect();

    let mut tasks = Vec::new();
    for i in 0..30 {
        let limiter = handles[i % handles.len()].clone();
        tasks.push(tokio::spawn(async move { limiter.acquire(1).await }));
    }
    let mut waits: Vec<u128> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().as_micros())
        .collect();
    waits.sort_unstable();

    // 10 banked permits and one debt-creating reservation are free; the rest queue 100ms apart.
    let mut expected = vec![0u128; 11];
    expected.extend((1..=19).map(|k| k * 100_000));
    assert_eq!(waits, expected);

    let state = handles[0].snapshot().await.unwrap();
    assert_eq!(state.next_free_ticket_micros, START + 2_000_000);
    assert!(state.stored_permits.abs() < 1e-9);
}

#[derive(Debug, Clone, Default)]
struct GateSleeper {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Sleeper for GateSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let entered = self.entered.clone();
        let release = self.release.clone();
        Box::pin(async move {
            entered.notify_one();
            release.notified().await;
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sleeping_caller_does_not_hold_the_lock() {
    let fx = Fixture::new();
    let gate = GateSleeper::default();
    let sleeping = RateLimiter::bursty(fx.frozen_ctx("gate", gate.clone()), 1.0, 1.0).unwrap();
    let other = RateLimiter::bursty(fx.frozen_ctx("gate", InstantSleeper), 1.0, 1.0).unwrap();

    let task = tokio::spawn(async move { sleeping.acquire(1).await });
    gate.entered.notified().await;

    assert!(!fx.lock.is_held("gate"));
    let rate = tokio::time::timeout(Duration::from_secs(1), other.rate())
        .await
        .expect("lock should be free while the first caller sleeps")
        .unwrap();
    assert!((rate - 1.0).abs() < 1e-9);
    assert_eq!(other.acquire(1).await.unwrap(), Duration::ZERO);

    gate.release.notify_one();
    assert_eq!(task.await.unwrap().unwrap(), Duration::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_try_acquire_grants_only_what_fits() {
    let fx = Fixture::new();
    let limiter = RateLimiter::bursty(fx.frozen_ctx("try", InstantSleeper), 5.0, 1.0).unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.try_acquire(1, Duration::ZERO).await })
        })
        .collect();
    let granted = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|joined| *joined.as_ref().unwrap().as_ref().unwrap())
        .count();

    // 5 banked permits plus the first queued one fit inside a zero timeout.
    assert_eq!(granted, 6);
}
