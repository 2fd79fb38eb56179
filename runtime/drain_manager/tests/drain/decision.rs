use std::sync::Arc;
use std::time::Duration;

use drain_manager::config::{DrainConfig, DrainStrategy, DrainType};
use drain_manager::{DrainDecision, DrainManager, DrainPhase};
use googletest::{assert_that, prelude::eq};

use crate::helpers::{
    RecordingHost, StalledDispatcher, completion_counter, config_with_drain_time, count, manager,
};

const WINDOW: Duration = Duration::from_secs(100);
const SAMPLES: usize = 20_000;

fn closed_ratio(manager: &DrainManager) -> f64 {
    let closed = (0..SAMPLES).filter(|_| manager.drain_close()).count();
    closed as f64 / SAMPLES as f64
}

#[tokio::test(start_paused = true)]
async fn nothing_is_closed_before_the_drain_sequence_starts() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));

    assert!(!manager.draining());
    assert_that!(manager.phase(), eq(DrainPhase::Idle));
    assert_that!(closed_ratio(&manager), eq(0.0));

    // The passage of time alone doesn't trigger draining.
    tokio::time::advance(WINDOW * 2).await;
    assert!(!manager.draining());
    assert_that!(closed_ratio(&manager), eq(0.0));
    assert!(manager.drain_deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn draining_is_reported_as_soon_as_the_sequence_starts() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));

    manager.start_drain_sequence(|| {});

    assert!(manager.draining());
    assert_that!(manager.phase(), eq(DrainPhase::Draining));
    let expected_deadline = tokio::time::Instant::now().into_std() + WINDOW;
    assert_that!(manager.drain_deadline(), eq(Some(expected_deadline)));
}

#[tokio::test(start_paused = true)]
async fn nothing_is_closed_at_the_start_of_the_drain_window() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));

    manager.start_drain_sequence(|| {});

    assert_that!(manager.close_probability(), eq(0.0));
    assert_that!(closed_ratio(&manager), eq(0.0));
}

#[tokio::test(start_paused = true)]
async fn nothing_is_closed_at_the_start_of_the_longest_drain_window() {
    let (manager, _) = manager(config_with_drain_time(DrainConfig::MAX_DURATION));

    manager.start_drain_sequence(|| {});

    assert_that!(manager.close_probability(), eq(0.0));
    assert_that!(closed_ratio(&manager), eq(0.0));
    let expected_deadline = tokio::time::Instant::now().into_std() + DrainConfig::MAX_DURATION;
    assert_that!(manager.drain_deadline(), eq(Some(expected_deadline)));

    tokio::time::advance(Duration::from_secs(60)).await;
    let probability = manager.close_probability();
    assert!(
        probability > 0.0 && probability < 1e-6,
        "Expected a tiny close probability, got {probability}"
    );
}

#[tokio::test(start_paused = true)]
async fn close_probability_grows_over_the_drain_window() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    manager.start_drain_sequence(|| {});

    let mut previous_ratio = 0.0;
    for quarter in 1..=3 {
        tokio::time::advance(WINDOW / 4).await;

        let expected = quarter as f64 / 4.0;
        let probability = manager.close_probability();
        assert!(
            (probability - expected).abs() < 1e-9,
            "Expected a close probability of {expected}, got {probability}"
        );

        let ratio = closed_ratio(&manager);
        assert!(
            (ratio - expected).abs() < 0.05,
            "Expected roughly {expected} of the connections to be closed, got {ratio}"
        );
        assert!(
            ratio >= previous_ratio,
            "The ratio of closed connections went down from {previous_ratio} to {ratio}"
        );
        previous_ratio = ratio;
    }
}

#[tokio::test(start_paused = true)]
async fn everything_is_closed_once_the_deadline_is_reached() {
    let (manager, _) = manager(config_with_drain_time(WINDOW));
    manager.start_drain_sequence(|| {});

    tokio::time::advance(WINDOW).await;
    assert_that!(manager.close_probability(), eq(1.0));
    assert_that!(closed_ratio(&manager), eq(1.0));

    tokio::time::advance(WINDOW).await;
    assert_that!(closed_ratio(&manager), eq(1.0));
}

#[tokio::test(start_paused = true)]
async fn everything_is_closed_past_the_deadline_even_if_no_tick_was_delivered() {
    let host = RecordingHost::new(1000);
    let manager = DrainManager::new(
        config_with_drain_time(WINDOW),
        Arc::new(StalledDispatcher),
        host,
    )
    .unwrap();
    let (completions, on_complete) = completion_counter();
    manager.start_drain_sequence(on_complete);

    tokio::time::advance(WINDOW + Duration::from_secs(1)).await;

    assert_that!(closed_ratio(&manager), eq(1.0));
    // No tick, no completion.
    assert_that!(count(&completions), eq(0));
    assert_that!(manager.phase(), eq(DrainPhase::Draining));
}

#[tokio::test(start_paused = true)]
async fn modify_only_listeners_are_never_closed_because_of_time() {
    let mut config = config_with_drain_time(WINDOW);
    config.drain_type = DrainType::ModifyOnly;
    let (manager, _) = manager(config);

    assert_that!(closed_ratio(&manager), eq(0.0));
    manager.start_drain_sequence(|| {});
    assert!(manager.draining());

    for _ in 0..4 {
        tokio::time::advance(WINDOW / 2).await;
        assert_that!(manager.close_probability(), eq(0.0));
        assert_that!(closed_ratio(&manager), eq(0.0));
    }
}

#[tokio::test(start_paused = true)]
async fn modify_only_listeners_still_honour_the_connection_watermark() {
    let mut config = config_with_drain_time(WINDOW);
    config.drain_type = DrainType::ModifyOnly;
    let (manager, _) = manager(config);
    manager.start_drain_sequence(|| {});
    tokio::time::advance(WINDOW * 2).await;

    assert!(manager.set_connection_drain_percentage(50));

    assert!(!manager.should_close_connection(500));
    assert!(manager.should_close_connection(501));
}

#[tokio::test(start_paused = true)]
async fn immediate_strategy_closes_everything_as_soon_as_draining_starts() {
    let mut config = config_with_drain_time(WINDOW);
    config.drain_strategy = DrainStrategy::Immediate;
    let (manager, _) = manager(config);

    assert_that!(closed_ratio(&manager), eq(0.0));
    manager.start_drain_sequence(|| {});

    assert_that!(manager.close_probability(), eq(1.0));
    assert_that!(closed_ratio(&manager), eq(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_started_sequence_is_visible_from_every_thread() {
    let (manager, _) = manager(config_with_drain_time(Duration::from_secs(60 * 60)));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let _ = manager.drain_close();
                    let _ = manager.draining();
                    let _ = manager.draining_connections();
                    let _ = manager.drain_connections_limit();
                }
            })
        })
        .collect();

    manager.start_drain_sequence(|| {});

    let observer = manager.clone();
    let (draining, deadline) = std::thread::spawn(move || {
        (observer.draining(), observer.drain_deadline())
    })
    .join()
    .unwrap();
    assert!(draining);
    assert_that!(deadline, eq(manager.drain_deadline()));

    for reader in readers {
        reader.join().unwrap();
    }
}
