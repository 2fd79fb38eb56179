use std::sync::{Arc, Mutex};
use std::time::Duration;

use drain_manager::{DrainDecision, DrainPhase};
use googletest::{assert_that, prelude::eq};

use crate::helpers::{completion_counter, config_with_drain_time, count, manager};

const WINDOW: Duration = Duration::from_secs(10);
const SECOND: Duration = Duration::from_secs(1);

#[tokio::test(start_paused = true)]
async fn completion_is_signalled_once_the_drain_window_elapses() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    let (completions, on_complete) = completion_counter();

    manager.start_drain_sequence(on_complete);

    tokio::time::sleep(WINDOW - SECOND / 2).await;
    assert_that!(count(&completions), eq(0));
    assert_that!(manager.phase(), eq(DrainPhase::Draining));

    tokio::time::sleep(SECOND).await;
    assert_that!(count(&completions), eq(1));
    assert_that!(manager.phase(), eq(DrainPhase::Complete));

    // Completion is terminal: the tick has stopped and nothing fires again.
    tokio::time::sleep(WINDOW * 10).await;
    assert_that!(count(&completions), eq(1));
    assert_that!(manager.phase(), eq(DrainPhase::Complete));
    assert!(manager.draining());
}

#[tokio::test(start_paused = true)]
async fn completion_is_never_signalled_before_the_deadline_with_coarse_ticks() {
    let mut config = config_with_drain_time(WINDOW);
    // Ticks at 7s (too early) and 14s.
    config.tick_interval = Duration::from_secs(7);
    let (manager, _) = manager(config);
    let (completions, on_complete) = completion_counter();

    manager.start_drain_sequence(on_complete);

    tokio::time::sleep(Duration::from_secs(13)).await;
    assert_that!(count(&completions), eq(0));
    // The decision doesn't wait for the tick.
    assert!(manager.drain_close());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_that!(count(&completions), eq(1));
}

#[tokio::test(start_paused = true)]
async fn starting_a_second_time_does_not_move_the_deadline() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    let (first, on_first_complete) = completion_counter();
    let (second, on_second_complete) = completion_counter();

    manager.start_drain_sequence(on_first_complete);
    let deadline = manager.drain_deadline().unwrap();

    tokio::time::sleep(WINDOW / 2).await;
    manager.start_drain_sequence(on_second_complete);
    assert_that!(manager.drain_deadline(), eq(Some(deadline)));

    tokio::time::sleep(WINDOW / 2 + SECOND / 2).await;
    assert_that!(count(&first), eq(1));

    tokio::time::sleep(WINDOW * 2).await;
    assert_that!(count(&first), eq(1));
    assert_that!(count(&second), eq(0));
    assert_that!(manager.drain_deadline(), eq(Some(deadline)));
}

#[tokio::test(start_paused = true)]
async fn phase_transitions_are_broadcast_to_subscribers() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    let mut phase = manager.subscribe();
    assert_that!(*phase.borrow(), eq(DrainPhase::Idle));

    manager.start_drain_sequence(|| {});
    phase.changed().await.unwrap();
    assert_that!(*phase.borrow_and_update(), eq(DrainPhase::Draining));

    phase
        .wait_for(|p| *p == DrainPhase::Complete)
        .await
        .unwrap();
    let deadline = manager.drain_deadline().unwrap();
    assert!(tokio::time::Instant::now().into_std() >= deadline);
}

#[tokio::test(start_paused = true)]
async fn the_completion_callback_runs_before_completion_is_broadcast() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    let observed = Arc::new(Mutex::new(None));
    let mut phase = manager.subscribe();

    let seen_by_callback = observed.clone();
    let phase_at_callback = manager.subscribe();
    manager.start_drain_sequence(move || {
        *seen_by_callback.lock().unwrap() = Some(*phase_at_callback.borrow());
    });

    phase
        .wait_for(|p| *p == DrainPhase::Complete)
        .await
        .unwrap();
    assert_that!(*observed.lock().unwrap(), eq(Some(DrainPhase::Draining)));
    assert_that!(manager.phase(), eq(DrainPhase::Complete));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_manager_cancels_the_drain_tick() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    let (completions, on_complete) = completion_counter();

    manager.start_drain_sequence(on_complete);
    drop(manager);

    tokio::time::sleep(WINDOW * 3).await;
    assert_that!(count(&completions), eq(0));
}

#[tokio::test(start_paused = true)]
async fn clones_share_the_same_drain_sequence() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    let (completions, on_complete) = completion_counter();
    let clone = manager.clone();

    clone.start_drain_sequence(on_complete);
    assert!(manager.draining());
    assert_that!(manager.drain_deadline(), eq(clone.drain_deadline()));

    // The remaining handle keeps the sequence alive.
    drop(clone);
    tokio::time::sleep(WINDOW + SECOND).await;
    assert_that!(count(&completions), eq(1));
}
