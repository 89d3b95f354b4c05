//! Tokio-driven switch engine.
//!
//! # Concurrency
//!
//! One `tokio::sync::Mutex` guards [`EngineState`] and the code generator.
//! Both the tick evaluation and `report_check_in` go through it, so exactly
//! one of them mutates state at any instant.
//!
//! The lock is held only while deciding. Notification IO happens after it is
//! released, which means callbacks keep being accepted while a message is in
//! flight. On trigger the phase flips to `Triggered` inside the lock, before
//! the release is sent, so no late check-in can race the release.
//!
//! # Schedule
//!
//! The first tick fires one interval after the loop starts. Ticks follow a
//! fixed schedule (`interval_at`); a tick that overruns skips the missed
//! slots instead of bursting, so one slow send never counts as several
//! missed check-ins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::machine;
use crate::notify::{challenge_message, release_message};
use crate::{
    CheckInDecision, CodeGenerator, EngineState, NotificationPort, SwitchConfig, SwitchError,
    TickAction,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of one evaluation, after its notification (if any) was delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Engine triggered earlier or was stopped; nothing evaluated.
    Idle,
    /// A new code was sent to the operator.
    Challenged { missed: bool },
    /// The secret was released to the recipients.
    Triggered,
}

/// Why the evaluation loop ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchExit {
    Stopped,
    Triggered,
}

// ---------------------------------------------------------------------------
// SwitchEngine
// ---------------------------------------------------------------------------

struct Core {
    state: EngineState,
    codes: CodeGenerator,
}

struct Inner {
    config: SwitchConfig,
    port: Arc<dyn NotificationPort>,
    core: Mutex<Core>,
    /// `true` once stopped; never flips back.
    shutdown: watch::Sender<bool>,
}

/// Cloneable handle to one switch. All clones share the same state.
#[derive(Clone)]
pub struct SwitchEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SwitchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchEngine")
            .field("config", &self.inner.config)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl SwitchEngine {
    /// Build an armed engine without starting its loop.
    pub fn new(
        config: SwitchConfig,
        port: Arc<dyn NotificationPort>,
    ) -> Result<Self, SwitchError> {
        Self::with_codes(config, port, CodeGenerator::from_entropy())
    }

    pub fn with_codes(
        config: SwitchConfig,
        port: Arc<dyn NotificationPort>,
        codes: CodeGenerator,
    ) -> Result<Self, SwitchError> {
        config.validate()?;
        let (shutdown, _rx) = watch::channel(false);
        let state = EngineState::new(config.forgiveness);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                port,
                core: Mutex::new(Core { state, codes }),
                shutdown,
            }),
        })
    }

    /// Validate `config` and begin the periodic evaluation loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: SwitchConfig,
        port: Arc<dyn NotificationPort>,
    ) -> Result<SwitchHandle, SwitchError> {
        Ok(Self::new(config, port)?.spawn())
    }

    /// Spawn the evaluation loop for an engine built with [`new`](Self::new).
    pub fn spawn(self) -> SwitchHandle {
        let shutdown = self.inner.shutdown.subscribe();
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run(shutdown).await });
        info!(
            interval_secs = self.inner.config.interval.as_secs(),
            forgiveness = self.inner.config.forgiveness,
            recipients = self.inner.config.recipients.len(),
            "switch armed"
        );
        SwitchHandle { engine: self, task }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.inner.config
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> EngineState {
        self.inner.core.lock().await.state.clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Cancel future evaluations. An evaluation already running completes.
    /// Does not undo a trigger.
    pub fn stop(&self) {
        let was_stopped = self.inner.shutdown.send_replace(true);
        if !was_stopped {
            info!("switch stopping");
        }
    }

    /// Resolves once the engine has stopped for any reason.
    pub async fn stopped(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Check-in callback. `true` iff the engine is armed and `code` matches
    /// the pending code exactly; anything else is a silent no-op.
    pub async fn report_check_in(&self, code: &str) -> bool {
        if self.is_stopped() {
            debug!("check-in ignored: switch stopped");
            return false;
        }

        let decision = {
            let mut core = self.inner.core.lock().await;
            machine::check_in(&self.inner.config, &mut core.state, code)
        };

        match decision {
            CheckInDecision::Accepted => info!(
                forgiveness = self.inner.config.forgiveness,
                "check-in accepted; forgiveness restored"
            ),
            CheckInDecision::Mismatch => debug!("check-in ignored: no matching code"),
            CheckInDecision::AlreadyTriggered => debug!("check-in ignored: switch triggered"),
        }
        decision.is_accepted()
    }

    /// Run exactly one evaluation and deliver what it decided.
    ///
    /// A delivery failure is returned as [`SwitchError::Notification`]; the
    /// state transition that led to it is not rolled back.
    pub async fn tick(&self) -> Result<TickOutcome, SwitchError> {
        if self.is_stopped() {
            return Ok(TickOutcome::Idle);
        }

        let (action, remaining) = {
            let mut core = self.inner.core.lock().await;
            let Core { state, codes } = &mut *core;
            let action = machine::evaluate_tick(&self.inner.config, state, codes);
            (action, state.remaining_forgiveness)
        };

        let cfg = &self.inner.config;
        match action {
            TickAction::Idle => Ok(TickOutcome::Idle),
            TickAction::Challenge { code, missed } => {
                if missed {
                    warn!(remaining, "check-in missed; re-challenging operator");
                } else {
                    info!(remaining, "challenging operator");
                }
                let msg = challenge_message(cfg, &code, self.deadline());
                if let Err(err) = self.inner.port.send(msg).await {
                    error!(error = %err, "failed to deliver challenge");
                    return Err(err.into());
                }
                Ok(TickOutcome::Challenged { missed })
            }
            TickAction::Trigger => {
                error!(
                    recipients = cfg.recipients.len(),
                    "forgiveness exhausted; releasing secret"
                );
                if let Err(err) = self.inner.port.send(release_message(cfg)).await {
                    error!(error = %err, "failed to release secret");
                    return Err(err.into());
                }
                info!("secret released");
                Ok(TickOutcome::Triggered)
            }
        }
    }

    fn deadline(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.inner.config.interval)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<SwitchExit, SwitchError> {
        let period = self.inner.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            if *shutdown.borrow_and_update() {
                break Ok(SwitchExit::Stopped);
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                _ = ticker.tick() => {}
            }
            match self.tick().await {
                Ok(TickOutcome::Triggered) => break Ok(SwitchExit::Triggered),
                Ok(_) => {}
                Err(err) => break Err(err),
            }
        };

        // Callbacks become no-ops and `stopped()` waiters wake up.
        self.inner.shutdown.send_replace(true);
        exit
    }
}

// ---------------------------------------------------------------------------
// SwitchHandle
// ---------------------------------------------------------------------------

/// A running switch: the engine plus its evaluation task.
#[derive(Debug)]
pub struct SwitchHandle {
    engine: SwitchEngine,
    task: JoinHandle<Result<SwitchExit, SwitchError>>,
}

impl SwitchHandle {
    pub fn engine(&self) -> SwitchEngine {
        self.engine.clone()
    }

    pub async fn report_check_in(&self, code: &str) -> bool {
        self.engine.report_check_in(code).await
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Wait for the loop to end and return why it ended.
    pub async fn join(self) -> Result<SwitchExit, SwitchError> {
        match self.task.await {
            Ok(res) => res,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(SwitchExit::Stopped),
        }
    }
}
