use std::fmt;

// ---------------------------------------------------------------------------
// NotificationError
// ---------------------------------------------------------------------------

/// A [`NotificationPort`](crate::NotificationPort) failed to deliver a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The message could not be built (bad address, bad header).
    Message(String),
    /// The transport refused or dropped the message.
    Transport(String),
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::Message(msg) => write!(f, "message build failed: {msg}"),
            NotificationError::Transport(msg) => write!(f, "transport failed: {msg}"),
        }
    }
}

impl std::error::Error for NotificationError {}

// ---------------------------------------------------------------------------
// SwitchError
// ---------------------------------------------------------------------------

/// Every error the switch can surface. All of them are fatal to the process.
///
/// A check-in with the wrong code is **not** represented here:
/// it is a silent no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// Malformed address, non-positive interval, empty recipient list, ...
    ConfigInvalid(String),
    /// Mail transport unreachable or credentials rejected before arming.
    Preflight(String),
    /// Delivery failed during a tick (re-challenge or release).
    Notification(NotificationError),
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchError::ConfigInvalid(msg) => write!(f, "CONFIG_INVALID: {msg}"),
            SwitchError::Preflight(msg) => write!(f, "PREFLIGHT_FAILED: {msg}"),
            SwitchError::Notification(err) => write!(f, "NOTIFICATION_FAILED: {err}"),
        }
    }
}

impl std::error::Error for SwitchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SwitchError::Notification(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NotificationError> for SwitchError {
    fn from(err: NotificationError) -> Self {
        SwitchError::Notification(err)
    }
}
