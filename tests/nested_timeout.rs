//! Nested timeout and cancellation-chaining scenarios.

mod common;

use common::TestError;
use ripcord::{
    CancelReason, Executor, Execution, FallbackPolicy, Outcome, PolicyError, RetryPolicy,
    TimeoutPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn counting<T, E>(counter: Arc<AtomicUsize>) -> impl Fn(&Execution<T, E>) + Send + Sync {
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

// Outer timeout over retry over inner timeout: the inner timeout cancels
// attempt after attempt until the outer deadline ends the whole call.
#[tokio::test]
async fn outer_timeout_ends_a_retrying_inner_timeout() {
    let inner_trips = Arc::new(AtomicUsize::new(0));
    let failed_attempts = Arc::new(AtomicUsize::new(0));

    let outer = TimeoutPolicy::new(Duration::from_millis(500)).unwrap();
    let retry = RetryPolicy::builder()
        .max_attempts(10)
        .expect("max_attempts > 0")
        .on_failed_attempt(counting::<(), TestError>(failed_attempts.clone()))
        .build();
    let inner = TimeoutPolicy::new(Duration::from_millis(100))
        .unwrap()
        .on_failure(counting::<(), TestError>(inner_trips.clone()));

    let executor = Executor::new().with(outer).with(retry).with(inner);

    let canceled_seen = Arc::new(Mutex::new(Vec::new()));
    let canceled_in_work = canceled_seen.clone();
    let result = executor
        .run(move |exec| {
            let canceled = canceled_in_work.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                canceled.lock().unwrap().push(exec.is_canceled());
                Ok(())
            }
        })
        .await;

    assert!(result.unwrap_err().is_timeout());
    assert!(inner_trips.load(Ordering::SeqCst) >= 3);
    assert!(failed_attempts.load(Ordering::SeqCst) >= 3);
    let canceled = canceled_seen.lock().unwrap();
    assert!(!canceled.is_empty());
    assert!(canceled.iter().all(|&c| c), "every completed attempt observed its trip");
}

// Fallback over retry over two stacked timeouts where the outer fires
// first: both trip on every attempt and the fallback supplies the result.
#[tokio::test]
async fn fallback_covers_two_stacked_timeouts() {
    let outer_trips = Arc::new(AtomicUsize::new(0));
    let inner_trips = Arc::new(AtomicUsize::new(0));

    let fallback = FallbackPolicy::value(true);
    let retry = RetryPolicy::builder().max_attempts(3).expect("max_attempts > 0").build();
    let outer = TimeoutPolicy::new(Duration::from_millis(50))
        .unwrap()
        .on_failure(counting::<bool, TestError>(outer_trips.clone()));
    let inner = TimeoutPolicy::new(Duration::from_millis(100))
        .unwrap()
        .on_failure(counting::<bool, TestError>(inner_trips.clone()));

    let executor = Executor::new().with(fallback).with(retry).with(outer).with(inner);

    let result = executor
        .get(|_exec: Execution<bool, TestError>| async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(false)
        })
        .await;

    assert!(result.unwrap(), "fallback replaced the timeout");
    assert_eq!(outer_trips.load(Ordering::SeqCst), 3);
    assert_eq!(inner_trips.load(Ordering::SeqCst), 3);
}

// Retry over nested timeouts: each attempt is canceled by the outer layer,
// unwinds through the inner one, and the retry runs its full budget.
#[tokio::test]
async fn retry_cancels_each_nested_timeout_attempt() {
    let failed_attempts = Arc::new(AtomicUsize::new(0));
    let outer_trips = Arc::new(AtomicUsize::new(0));
    let inner_trips = Arc::new(AtomicUsize::new(0));

    let retry = RetryPolicy::builder()
        .max_attempts(3)
        .expect("max_attempts > 0")
        .on_failed_attempt(counting::<(), TestError>(failed_attempts.clone()))
        .build();
    let outer = TimeoutPolicy::new(Duration::from_millis(100))
        .unwrap()
        .on_failure(counting::<(), TestError>(outer_trips.clone()));
    let inner = TimeoutPolicy::new(Duration::from_millis(300))
        .unwrap()
        .on_failure(counting::<(), TestError>(inner_trips.clone()));

    let executor = Executor::new().with(retry).with(outer).with(inner);

    let result = executor
        .run(|_exec| async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(())
        })
        .await;

    assert!(result.unwrap_err().is_timeout());
    assert_eq!(failed_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(outer_trips.load(Ordering::SeqCst), 3);
    assert_eq!(inner_trips.load(Ordering::SeqCst), 3);
}

// The retry layer installs a fresh signal per attempt: a trip inside one
// attempt is never visible at the start of the next.
#[tokio::test]
async fn each_attempt_starts_with_a_live_signal() {
    let retry = RetryPolicy::builder().max_attempts(3).expect("max_attempts > 0").build();
    let timeout = TimeoutPolicy::new(Duration::from_millis(30)).unwrap();
    let executor = Executor::new().with(retry).with(timeout);

    let at_entry = Arc::new(Mutex::new(Vec::new()));
    let at_entry_in_work = at_entry.clone();
    let result = executor
        .run(move |exec: Execution<(), TestError>| {
            let at_entry = at_entry_in_work.clone();
            async move {
                at_entry.lock().unwrap().push(exec.is_canceled());
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(())
            }
        })
        .await;

    assert!(result.unwrap_err().is_timeout());
    assert_eq!(*at_entry.lock().unwrap(), vec![false, false, false]);
}

// Signals chain strictly: an outer trip is observable below even though the
// inner timeout's own timer never fired, and the outer layer's outcome wins
// over the late success.
#[tokio::test]
async fn outer_trip_reaches_the_work_through_a_live_inner_timeout() {
    let outer = TimeoutPolicy::new(Duration::from_millis(60)).unwrap();
    let inner = TimeoutPolicy::new(Duration::from_secs(600)).unwrap();
    let executor = Executor::new().with(outer).with(inner);

    let reason_seen = Arc::new(Mutex::new(None));
    let reason_in_work = reason_seen.clone();
    let result = executor
        .run(move |exec: Execution<(), TestError>| {
            let reason = reason_in_work.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                *reason.lock().unwrap() = exec.cancel_reason();
                Ok(())
            }
        })
        .await;

    assert!(result.unwrap_err().is_timeout());
    assert_eq!(*reason_seen.lock().unwrap(), Some(CancelReason::TimeoutExceeded));
}

// A caller-owned signal aborts a retry loop mid-flight and the abort is
// prompt even though the work function itself never checks for it.
#[tokio::test]
async fn user_abort_cancels_a_sleeping_retry_loop() {
    let retry = RetryPolicy::builder()
        .unbounded()
        .backoff(ripcord::Backoff::constant(Duration::from_millis(40)))
        .build();
    let executor = Executor::new().with(retry);

    let signal = ripcord::CancelSignal::new();
    let tripper = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tripper.trip(CancelReason::UserAborted);
    });

    let counter = Arc::new(AtomicUsize::new(0));
    let counter_in_work = counter.clone();
    let started = Instant::now();
    let result: Outcome<(), TestError> = executor
        .run_with_signal(&signal, move |_exec| {
            let counter = counter_in_work.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PolicyError::Inner(TestError("flaky")))
            }
        })
        .await;

    assert!(started.elapsed() < Duration::from_secs(2), "abort must be prompt");
    assert!(counter.load(Ordering::SeqCst) >= 1);
    assert!(result.unwrap_err().is_inner(), "the last error surfaces");
}
