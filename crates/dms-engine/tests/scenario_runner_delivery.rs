//! Scenario: the tokio runner delivers what the machine decides.
//!
//! Uses a recording [`NotificationPort`] double; no SMTP, no network.
//!
//! # Invariants under test
//!
//! - Challenges go to the operator only; the release goes once to every
//!   recipient and carries the secret.
//! - A delivery failure is fatal: the error surfaces and the engine goes inert.
//! - Concurrent check-ins are serialized; exactly one matching call wins.
//! - `start` refuses a non-positive interval or an empty recipient list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dms_engine::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPort {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingPort {
    fn failing() -> Self {
        let port = Self::default();
        port.fail.store(true, Ordering::SeqCst);
        port
    }

    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NotificationPort for RecordingPort {
    async fn send(&self, message: Notification) -> Result<(), NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp: 421 service not available".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

fn cfg(forgiveness: u32) -> SwitchConfig {
    SwitchConfig::new(
        "operator@example.com",
        vec!["alice@example.com".to_string(), "bob@example.com".to_string()],
        Duration::from_secs(60),
        forgiveness,
        Secret::new("correct horse battery staple"),
    )
    .with_public_url("http://switch.local:9999")
}

fn engine(forgiveness: u32, port: &Arc<RecordingPort>) -> SwitchEngine {
    let port: Arc<dyn NotificationPort> = port.clone();
    SwitchEngine::with_codes(cfg(forgiveness), port, CodeGenerator::seeded(31)).unwrap()
}

async fn pending(engine: &SwitchEngine) -> String {
    engine
        .snapshot()
        .await
        .pending_code
        .expect("a code must be pending")
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn challenge_is_mailed_to_operator_with_the_pending_code() {
    let port = Arc::new(RecordingPort::default());
    let engine = engine(1, &port);

    assert_eq!(
        engine.tick().await.unwrap(),
        TickOutcome::Challenged { missed: false }
    );

    let code = pending(&engine).await;
    let sent = port.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["operator@example.com".to_string()]);
    let body = String::from_utf8(sent[0].body.clone()).unwrap();
    assert!(body.contains(&format!("http://switch.local:9999/{code}")));
    assert!(!body.contains("correct horse"), "challenge must not leak the secret");
}

#[tokio::test]
async fn budget_zero_releases_secret_once_to_full_recipient_list() {
    let port = Arc::new(RecordingPort::default());
    let engine = engine(0, &port);

    assert!(matches!(engine.tick().await.unwrap(), TickOutcome::Challenged { .. }));
    assert_eq!(engine.tick().await.unwrap(), TickOutcome::Triggered);
    assert_eq!(engine.tick().await.unwrap(), TickOutcome::Idle);

    let sent = port.sent();
    assert_eq!(sent.len(), 2, "one challenge + exactly one release");
    let release = &sent[1];
    assert_eq!(
        release.to,
        vec!["alice@example.com".to_string(), "bob@example.com".to_string()]
    );
    assert!(release
        .body
        .windows(b"correct horse battery staple".len())
        .any(|w| w == b"correct horse battery staple"));

    let st = engine.snapshot().await;
    assert_eq!(st.phase, Phase::Triggered);
    assert!(!engine.report_check_in("whatever").await);
}

#[tokio::test]
async fn accepted_check_in_prevents_trigger() {
    let port = Arc::new(RecordingPort::default());
    let engine = engine(0, &port);

    for _ in 0..5 {
        engine.tick().await.unwrap();
        let code = pending(&engine).await;
        assert!(!engine.report_check_in("not-the-code").await);
        assert!(engine.report_check_in(&code).await);
        assert!(!engine.report_check_in(&code).await, "codes are single-use");
    }
    assert_eq!(engine.snapshot().await.phase, Phase::Armed);
    assert!(port.sent().iter().all(|m| m.to == vec!["operator@example.com".to_string()]));
}

// ---------------------------------------------------------------------------
// Failure is fatal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_challenge_delivery_is_a_notification_error() {
    let port = Arc::new(RecordingPort::failing());
    let engine = engine(1, &port);

    let err = engine.tick().await.unwrap_err();
    assert!(matches!(err, SwitchError::Notification(NotificationError::Transport(_))));
    assert!(err.to_string().starts_with("NOTIFICATION_FAILED"));
}

#[tokio::test]
async fn failed_release_still_leaves_engine_triggered() {
    let port = Arc::new(RecordingPort::default());
    let engine = engine(0, &port);

    engine.tick().await.unwrap();
    port.fail.store(true, Ordering::SeqCst);

    let err = engine.tick().await.unwrap_err();
    assert!(matches!(err, SwitchError::Notification(_)));
    assert_eq!(engine.snapshot().await.phase, Phase::Triggered);
}

#[tokio::test(start_paused = true)]
async fn loop_stops_and_goes_inert_on_delivery_failure() {
    let port = Arc::new(RecordingPort::failing());
    let dyn_port: Arc<dyn NotificationPort> = port.clone();
    let handle = SwitchEngine::start(cfg(3), dyn_port).unwrap();
    let engine = handle.engine();

    let res = handle.join().await;
    assert!(matches!(res, Err(SwitchError::Notification(_))));
    assert!(engine.is_stopped());

    // The code was set before the send failed, but nothing may accept it now.
    let code = pending(&engine).await;
    assert!(!engine.report_check_in(&code).await);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_check_ins_only_one_match_wins() {
    let port = Arc::new(RecordingPort::default());
    let engine = engine(2, &port);
    engine.tick().await.unwrap();
    engine.tick().await.unwrap();
    let code = pending(&engine).await;

    let mut tasks = Vec::new();
    for i in 0..64 {
        let engine = engine.clone();
        let token = if i % 8 == 0 {
            code.clone()
        } else {
            format!("wrong-{i}")
        };
        tasks.push(tokio::spawn(async move { engine.report_check_in(&token).await }));
    }

    let mut accepted = 0;
    for t in tasks {
        if t.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1, "a code is accepted exactly once");

    let st = engine.snapshot().await;
    assert!(st.pending_code.is_none());
    assert_eq!(st.remaining_forgiveness, 2);
}

// ---------------------------------------------------------------------------
// Config validation at start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_rejects_zero_interval_and_empty_recipients() {
    let port: Arc<dyn NotificationPort> = Arc::new(RecordingPort::default());

    let mut zero = cfg(1);
    zero.interval = Duration::ZERO;
    let err = SwitchEngine::start(zero, port.clone()).unwrap_err();
    assert!(matches!(err, SwitchError::ConfigInvalid(_)));

    let mut empty = cfg(1);
    empty.recipients.clear();
    let err = SwitchEngine::start(empty, port).unwrap_err();
    assert!(matches!(err, SwitchError::ConfigInvalid(_)));
}
