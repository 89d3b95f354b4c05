//! Scenario: tick schedule and cancellation of the evaluation loop.
//!
//! Runs on a paused tokio clock, so "one interval" is virtual time.
//!
//! # Invariants under test
//!
//! - The first evaluation fires one interval after `start`, never before.
//! - Unanswered intervals drive the loop to a release and a `Triggered` exit.
//! - `stop()` is observed before the next tick and ends the loop cleanly.
//! - Check-ins are accepted while a challenge is still being delivered, and
//!   `stop()` during a delivery lets that delivery finish.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dms_engine::*;
use tokio::sync::Notify;
use tokio::time::sleep;

#[derive(Default)]
struct RecordingPort {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingPort {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl NotificationPort for RecordingPort {
    async fn send(&self, message: Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Parks every send until the test releases it.
#[derive(Default)]
struct GatedPort {
    entered: Notify,
    release: Notify,
    delivered: Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl NotificationPort for GatedPort {
    async fn send(&self, message: Notification) -> Result<(), NotificationError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.delivered.lock().unwrap().push(message);
        Ok(())
    }
}

const INTERVAL: Duration = Duration::from_secs(60);

fn start(forgiveness: u32, port: &Arc<RecordingPort>) -> SwitchHandle {
    let cfg = SwitchConfig::new(
        "operator@example.com",
        vec!["heir@example.com".to_string()],
        INTERVAL,
        forgiveness,
        Secret::new("deed to the house"),
    );
    let port: Arc<dyn NotificationPort> = port.clone();
    SwitchEngine::start(cfg, port).unwrap()
}

#[tokio::test(start_paused = true)]
async fn first_tick_fires_one_interval_after_start() -> anyhow::Result<()> {
    let port = Arc::new(RecordingPort::default());
    let handle = start(1, &port);
    let engine = handle.engine();

    sleep(INTERVAL - Duration::from_secs(1)).await;
    assert!(engine.snapshot().await.pending_code.is_none());
    assert_eq!(port.count(), 0);

    sleep(Duration::from_secs(2)).await;
    assert!(engine.snapshot().await.pending_code.is_some());
    assert_eq!(port.count(), 1);

    handle.stop();
    assert_eq!(handle.join().await?, SwitchExit::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unanswered_intervals_end_in_release() -> anyhow::Result<()> {
    let port = Arc::new(RecordingPort::default());
    let handle = start(1, &port);

    // t=60 challenge, t=120 re-challenge, t=180 release.
    let exit = handle.join().await?;
    assert_eq!(exit, SwitchExit::Triggered);
    assert_eq!(port.count(), 3);

    let sent = port.sent.lock().unwrap();
    assert_eq!(sent[2].to, vec!["heir@example.com".to_string()]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn check_ins_between_ticks_keep_the_switch_armed() -> anyhow::Result<()> {
    let port = Arc::new(RecordingPort::default());
    let handle = start(0, &port);
    let engine = handle.engine();

    for cycle in 1..=10u64 {
        // Land half-way through each interval.
        sleep(if cycle == 1 { INTERVAL + INTERVAL / 2 } else { INTERVAL }).await;
        let code = engine
            .snapshot()
            .await
            .pending_code
            .expect("each tick issues a code");
        assert!(handle.report_check_in(&code).await, "cycle {cycle}");
    }

    assert_eq!(engine.snapshot().await.phase, Phase::Armed);
    assert_eq!(port.count(), 10);

    handle.stop();
    assert_eq!(handle.join().await?, SwitchExit::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_before_first_tick_sends_nothing() -> anyhow::Result<()> {
    let port = Arc::new(RecordingPort::default());
    let handle = start(0, &port);
    let engine = handle.engine();

    handle.stop();
    assert_eq!(handle.join().await?, SwitchExit::Stopped);

    sleep(INTERVAL * 5).await;
    assert_eq!(port.count(), 0);
    assert!(engine.is_stopped());
    assert!(!engine.report_check_in("anything").await);
    assert_eq!(engine.tick().await?, TickOutcome::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stopped_future_resolves_after_trigger() {
    let port = Arc::new(RecordingPort::default());
    let handle = start(0, &port);
    let engine = handle.engine();

    engine.stopped().await;
    assert_eq!(engine.snapshot().await.phase, Phase::Triggered);
    assert_eq!(handle.join().await.unwrap(), SwitchExit::Triggered);
}

#[tokio::test(start_paused = true)]
async fn delivery_in_flight_neither_blocks_check_ins_nor_ignores_stop() -> anyhow::Result<()> {
    let port = Arc::new(GatedPort::default());
    let cfg = SwitchConfig::new(
        "operator@example.com",
        vec!["heir@example.com".to_string()],
        INTERVAL,
        1,
        Secret::new("deed to the house"),
    );
    let dyn_port: Arc<dyn NotificationPort> = port.clone();
    let handle = SwitchEngine::start(cfg, dyn_port)?;
    let engine = handle.engine();

    // First challenge is now parked inside the port.
    port.entered.notified().await;
    let code = engine
        .snapshot()
        .await
        .pending_code
        .expect("code is pending before delivery completes");
    assert!(engine.report_check_in(&code).await);
    assert!(port.delivered.lock().unwrap().is_empty());

    handle.stop();
    port.release.notify_one();

    assert_eq!(handle.join().await?, SwitchExit::Stopped);
    assert_eq!(port.delivered.lock().unwrap().len(), 1);

    let st = engine.snapshot().await;
    assert_eq!(st.phase, Phase::Armed);
    assert!(st.pending_code.is_none());
    Ok(())
}
