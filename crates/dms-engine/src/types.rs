use std::fmt;
use std::time::Duration;

use crate::code::DEFAULT_CODE_LENGTH;

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// The payload released to the recipients when the switch triggers.
///
/// Opaque bytes, set once before the engine starts. **Redacted in `Debug`.**
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<REDACTED {} bytes>)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// SwitchConfig
// ---------------------------------------------------------------------------

/// Immutable engine configuration.
///
/// Address syntax is checked by the configuration layer before this is built;
/// [`SwitchConfig::validate`] only enforces the structural rules the engine
/// itself depends on.
#[derive(Clone, Debug)]
pub struct SwitchConfig {
    /// The operator's own address. Challenges go here.
    pub operator: String,
    /// Addresses that receive the secret on trigger. Never empty.
    pub recipients: Vec<String>,
    /// Time between two evaluations.
    pub interval: Duration,
    /// Consecutive missed check-ins tolerated before triggering.
    pub forgiveness: u32,
    pub secret: Secret,
    /// Length of every generated check-in code.
    pub code_length: usize,
    /// Base URL the operator hits; the code is appended as the last path segment.
    pub public_url: String,
}

impl SwitchConfig {
    pub fn new(
        operator: impl Into<String>,
        recipients: Vec<String>,
        interval: Duration,
        forgiveness: u32,
        secret: Secret,
    ) -> Self {
        Self {
            operator: operator.into(),
            recipients,
            interval,
            forgiveness,
            secret,
            code_length: DEFAULT_CODE_LENGTH,
            public_url: "http://localhost:9999".to_string(),
        }
    }

    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = public_url.into();
        self
    }

    /// Structural checks performed by `SwitchEngine::start`.
    pub fn validate(&self) -> Result<(), crate::SwitchError> {
        use crate::SwitchError;

        if self.interval.is_zero() {
            return Err(SwitchError::ConfigInvalid(
                "check-in interval must be positive".to_string(),
            ));
        }
        if self.recipients.is_empty() {
            return Err(SwitchError::ConfigInvalid(
                "recipient list must not be empty".to_string(),
            ));
        }
        if self.recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(SwitchError::ConfigInvalid(
                "recipient list contains a blank address".to_string(),
            ));
        }
        if self.operator.trim().is_empty() {
            return Err(SwitchError::ConfigInvalid(
                "operator address must not be empty".to_string(),
            ));
        }
        if self.code_length == 0 {
            return Err(SwitchError::ConfigInvalid(
                "code length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// URL the operator must request to check in with `code`.
    pub fn check_in_url(&self, code: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), code)
    }
}

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Armed,
    /// Terminal. The secret has been (or is being) released.
    Triggered,
}

/// Mutable engine state, owned by the single evaluation path.
///
/// Invariant: `pending_code.is_some()` iff the engine is waiting for a
/// check-in this cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineState {
    /// Goes negative exactly once, on the tick that triggers.
    pub remaining_forgiveness: i64,
    pub pending_code: Option<String>,
    pub phase: Phase,
}

impl EngineState {
    pub fn new(forgiveness: u32) -> Self {
        Self {
            remaining_forgiveness: i64::from(forgiveness),
            pending_code: None,
            phase: Phase::Armed,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.phase == Phase::Triggered
    }

    pub fn is_waiting(&self) -> bool {
        self.pending_code.is_some()
    }
}

impl fmt::Debug for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The pending code is a bearer token for the check-in path.
        f.debug_struct("EngineState")
            .field("remaining_forgiveness", &self.remaining_forgiveness)
            .field("pending_code", &self.pending_code.as_ref().map(|_| "<REDACTED>"))
            .field("phase", &self.phase)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// What a tick asks the runner to do. Side-effect free; the caller enforces it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing to do (already triggered).
    Idle,
    /// Deliver `code` to the operator. `missed` is true when the previous
    /// challenge went unanswered and one unit of forgiveness was spent.
    Challenge { code: String, missed: bool },
    /// Release the secret to every recipient.
    Trigger,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckInDecision {
    Accepted,
    /// No challenge outstanding, or the code does not match.
    Mismatch,
    /// Engine already triggered; callbacks are no-ops.
    AlreadyTriggered,
}

impl CheckInDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CheckInDecision::Accepted)
    }
}
