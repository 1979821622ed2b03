//! Rate limiting and pacing as seen by concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use quotesync_core::{RateLimiter, RequestPacer};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn when_the_window_is_full_the_next_caller_waits_for_the_oldest_to_expire() {
    // Given: three permits per ten seconds
    let limiter = RateLimiter::new(3, Duration::from_secs(10));
    let start = Instant::now();

    // When: five calls are made back to back
    let mut admitted_at = Vec::new();
    for _ in 0..5 {
        limiter.acquire().await;
        admitted_at.push(Instant::now() - start);
    }

    // Then: the first three pass at once and the rest wait a full window
    assert_eq!(&admitted_at[..3], &[Duration::ZERO; 3]);
    assert_eq!(admitted_at[3], Duration::from_secs(10));
    assert_eq!(admitted_at[4], Duration::from_secs(10));
    assert_eq!(limiter.current_load().await, 2);
}

#[tokio::test(start_paused = true)]
async fn when_many_tasks_share_a_limiter_no_window_exceeds_the_limit() {
    // Given: one limiter shared by twelve tasks
    let limiter = Arc::new(RateLimiter::new(4, Duration::from_secs(1)));
    let start = Instant::now();

    // When: all of them acquire concurrently
    let handles: Vec<_> = (0..12)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now() - start
            })
        })
        .collect();
    let mut times = Vec::new();
    for handle in handles {
        times.push(handle.await.expect("task"));
    }
    times.sort();

    // Then: any five consecutive admissions span at least one window
    for pair in times.windows(5) {
        assert!(pair[4] - pair[0] >= Duration::from_secs(1), "{times:?}");
    }
    assert_eq!(times[11], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn when_requests_are_paced_consecutive_starts_are_spaced_by_the_delay() {
    // Given: a two second pacer
    let pacer = RequestPacer::new(Duration::from_secs(2));
    let cancel = CancellationToken::new();
    let start = Instant::now();

    // When: three requests ask to start
    let mut starts = Vec::new();
    for _ in 0..3 {
        assert!(pacer.wait(&cancel).await);
        starts.push(Instant::now() - start);
    }

    // Then: the first starts immediately and the others two seconds apart
    assert_eq!(
        starts,
        vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[tokio::test(start_paused = true)]
async fn when_cancelled_while_waiting_for_a_permit_the_caller_is_released() {
    // Given: a limiter whose only permit is taken
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    limiter.acquire().await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });
    let start = Instant::now();

    // When: another caller waits
    let permit = limiter.acquire_or_cancel(&cancel).await;

    // Then: cancellation wins long before the window frees up
    assert!(permit.is_none());
    assert_eq!(Instant::now() - start, Duration::from_secs(5));
    assert_eq!(limiter.current_load().await, 1);
}
