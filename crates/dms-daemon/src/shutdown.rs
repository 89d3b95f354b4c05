//! Graceful-shutdown trigger for the callback server.

use std::future::Future;

use dms_engine::SwitchEngine;
use tracing::{error, info};

/// Resolves when the server should stop: the operator interrupted the
/// process (which also stops the switch), or the switch ended on its own.
///
/// If `interrupt` fails (no signal handler could be installed), the switch
/// stays armed and only its own exit ends the server.
pub async fn shutdown_signal<F>(engine: SwitchEngine, interrupt: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    let interrupted = async {
        match interrupt.await {
            Ok(()) => info!("interrupt received"),
            Err(e) => {
                error!(error = %e, "ctrl-c handler failed; switch stays armed");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupted => engine.stop(),
        _ = engine.stopped() => {}
    }
}
