//! Window evaluator behaviour against the in-memory window store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ketuk_core::gate::GateState;
use ketuk_core::record::StoreError;
use ketuk_runtime::{TickOutcome, WindowEvaluator};
use ketuk_testing::{FixedClock, InMemoryWindowStore, ManualClock};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const JAKARTA: Tz = chrono_tz::Asia::Jakarta;

// ============================================================================
// Test Fixtures
// ============================================================================

/// 2024-08-01 08:00 civil time, the start of the reference window.
fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 8, 1)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap()
}

/// The instant at which Jakarta wall clocks read `civil`.
fn instant(civil: NaiveDateTime) -> DateTime<Utc> {
    JAKARTA
        .from_local_datetime(&civil)
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

fn evaluator(gate: &GateState, store: &InMemoryWindowStore, now: NaiveDateTime) -> WindowEvaluator {
    WindowEvaluator::new(
        gate.clone(),
        Arc::new(store.clone()),
        Arc::new(FixedClock::new(instant(now))),
        JAKARTA,
    )
}

// ============================================================================
// Count Policy
// ============================================================================

#[tokio::test]
async fn one_active_window_opens_the_gate() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));

    let outcome = evaluator(&gate, &store, t0() + ChronoDuration::hours(1))
        .evaluate_once()
        .await;

    assert_eq!(outcome, TickOutcome::Opened);
    assert!(gate.is_open());
}

#[tokio::test]
async fn no_active_window_closes_the_gate() {
    let gate = GateState::new();
    gate.open();
    let store = InMemoryWindowStore::new();

    let outcome = evaluator(&gate, &store, t0()).evaluate_once().await;

    assert_eq!(outcome, TickOutcome::Closed);
    assert!(!gate.is_open());
}

#[tokio::test]
async fn overlapping_windows_fail_closed() {
    let gate = GateState::new();
    gate.open();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));
    store.insert(t0() - ChronoDuration::hours(1), t0() + ChronoDuration::hours(1));

    let outcome = evaluator(&gate, &store, t0() + ChronoDuration::minutes(30))
        .evaluate_once()
        .await;

    assert_eq!(outcome, TickOutcome::Conflict { count: 2 });
    assert!(!gate.is_open());
}

#[tokio::test]
async fn window_bounds_are_inclusive() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    let end = t0() + ChronoDuration::hours(2);
    store.insert(t0(), end);

    assert_eq!(
        evaluator(&gate, &store, t0()).evaluate_once().await,
        TickOutcome::Opened
    );
    assert_eq!(
        evaluator(&gate, &store, end).evaluate_once().await,
        TickOutcome::Opened
    );
    assert_eq!(
        evaluator(&gate, &store, end + ChronoDuration::seconds(1))
            .evaluate_once()
            .await,
        TickOutcome::Closed
    );
}

#[tokio::test]
async fn windows_are_matched_in_the_configured_zone() {
    // 08:30 UTC is 15:30 in Jakarta, outside an 08:00-10:00 window authored
    // in Jakarta civil time.
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));

    let utc_reading = Utc.from_utc_datetime(&(t0() + ChronoDuration::minutes(30)));
    let evaluator = WindowEvaluator::new(
        gate.clone(),
        Arc::new(store),
        Arc::new(FixedClock::new(utc_reading)),
        JAKARTA,
    );

    assert_eq!(evaluator.evaluate_once().await, TickOutcome::Closed);
}

// ============================================================================
// Store Failures
// ============================================================================

#[tokio::test]
async fn store_failure_leaves_the_gate_unchanged() {
    let gate = GateState::new();
    gate.open();
    let store = InMemoryWindowStore::new();
    store.set_failure(Some(StoreError::Unavailable("connection refused".to_string())));

    let outcome = evaluator(&gate, &store, t0()).evaluate_once().await;

    assert!(matches!(outcome, TickOutcome::Skipped { .. }));
    assert!(gate.is_open());
}

#[tokio::test(start_paused = true)]
async fn slow_store_query_is_skipped_after_the_timeout() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));
    store.set_delay(Some(Duration::from_secs(30)));

    let outcome = evaluator(&gate, &store, t0() + ChronoDuration::hours(1))
        .with_query_timeout(Duration::from_secs(1))
        .evaluate_once()
        .await;

    match outcome {
        TickOutcome::Skipped { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected a skipped tick, got {other:?}"),
    }
    assert!(!gate.is_open());
}

// ============================================================================
// Loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn loop_ticks_immediately_then_on_the_interval() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));
    let clock = ManualClock::new(instant(t0() + ChronoDuration::hours(1)));

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = WindowEvaluator::new(
        gate.clone(),
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        JAKARTA,
    )
    .with_tick_interval(Duration::from_secs(60))
    .spawn(shutdown_tx.subscribe());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(gate.is_open(), "first tick should run at start");
    assert_eq!(store.query_count(), 1);

    clock.advance(ChronoDuration::hours(2));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!gate.is_open(), "second tick should see the window expired");
    assert_eq!(store.query_count(), 2);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_tick_interval_falls_back_to_one_second() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = evaluator(&gate, &store, t0() + ChronoDuration::hours(1))
        .with_tick_interval(Duration::ZERO)
        .spawn(shutdown_tx.subscribe());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(gate.is_open());
    assert_eq!(store.query_count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.query_count(), 2);

    shutdown_tx.send(()).unwrap();
    handle.await.expect("evaluator should stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn zero_query_timeout_still_lets_a_prompt_store_answer() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));
    store.set_delay(Some(Duration::from_millis(500)));

    let outcome = evaluator(&gate, &store, t0() + ChronoDuration::hours(1))
        .with_query_timeout(Duration::ZERO)
        .evaluate_once()
        .await;

    assert_eq!(outcome, TickOutcome::Opened);
    assert!(gate.is_open());
}

#[tokio::test]
async fn gate_stays_closed_until_the_first_tick() {
    let gate = GateState::new();
    let store = InMemoryWindowStore::new();
    store.insert(t0(), t0() + ChronoDuration::hours(2));
    let _evaluator = evaluator(&gate, &store, t0());

    assert!(!gate.is_open());
    assert_eq!(store.query_count(), 0);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn gate_is_open_iff_exactly_one_window_is_active(
        active in 0usize..5,
        inactive in 0usize..3,
        initially_open in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let gate = GateState::new();
        if initially_open {
            gate.open();
        }

        let store = InMemoryWindowStore::new();
        for _ in 0..active {
            store.insert(t0(), t0() + ChronoDuration::hours(2));
        }
        for _ in 0..inactive {
            store.insert(t0() + ChronoDuration::days(1), t0() + ChronoDuration::days(2));
        }

        let outcome = runtime.block_on(
            evaluator(&gate, &store, t0() + ChronoDuration::hours(1)).evaluate_once(),
        );

        prop_assert_eq!(gate.is_open(), active == 1);
        match active {
            0 => prop_assert_eq!(outcome, TickOutcome::Closed),
            1 => prop_assert_eq!(outcome, TickOutcome::Opened),
            n => prop_assert_eq!(outcome, TickOutcome::Conflict { count: n }),
        }
    }
}
