//! Scenario: what ends the callback server.
//!
//! # Invariants under test
//!
//! - An operator interrupt stops the switch and releases the server.
//! - A failed signal-handler install never disarms the switch; the server
//!   then waits for the switch to end on its own.
//! - A switch that ends by itself releases the server.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use dms_daemon::shutdown::shutdown_signal;
use dms_engine::*;
use tokio::time::timeout;

struct NullPort;

#[async_trait::async_trait]
impl NotificationPort for NullPort {
    async fn send(&self, _message: Notification) -> Result<(), NotificationError> {
        Ok(())
    }
}

fn engine() -> SwitchEngine {
    let cfg = SwitchConfig::new(
        "operator@example.com",
        vec!["heir@example.com".to_string()],
        Duration::from_secs(60),
        1,
        Secret::new("s3cr3t"),
    );
    SwitchEngine::new(cfg, Arc::new(NullPort)).expect("valid config")
}

#[tokio::test]
async fn interrupt_stops_the_switch() {
    let e = engine();
    timeout(Duration::from_secs(5), shutdown_signal(e.clone(), async { Ok(()) }))
        .await
        .expect("shutdown must resolve");
    assert!(e.is_stopped());
}

#[tokio::test]
async fn failed_interrupt_handler_keeps_the_switch_armed() {
    let e = engine();
    let fut = shutdown_signal(e.clone(), async {
        Err(io::Error::new(io::ErrorKind::Other, "no signal handler"))
    });
    tokio::pin!(fut);

    assert!(
        timeout(Duration::from_millis(100), &mut fut).await.is_err(),
        "server must keep running"
    );
    assert!(!e.is_stopped());

    e.stop();
    timeout(Duration::from_secs(5), fut)
        .await
        .expect("switch exit releases the server");
}

#[tokio::test]
async fn switch_exit_releases_the_server() {
    let e = engine();
    e.stop();
    timeout(
        Duration::from_secs(5),
        shutdown_signal(e.clone(), std::future::pending::<io::Result<()>>()),
    )
    .await
    .expect("shutdown must resolve");
}
