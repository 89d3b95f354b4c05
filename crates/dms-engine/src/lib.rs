//! dms-engine
//!
//! The dead man's switch engine: liveness tracking, one-time check-in codes,
//! and the single decision point that either re-challenges the operator or
//! releases the secret to the recipients.
//!
//! Layering:
//! - `machine`  pure transitions over [`EngineState`]. No IO, no clock.
//! - `runner`   tokio-driven [`SwitchEngine`]: owns the state behind one mutex,
//!   fires ticks on a fixed schedule and performs the notification the
//!   machine asks for.
//! - `notify`   the outbound [`NotificationPort`] boundary.

mod code;
mod error;
pub mod machine;
mod notify;
mod runner;
mod types;

pub use code::{CodeGenerator, ALPHABET, DEFAULT_CODE_LENGTH};
pub use error::{NotificationError, SwitchError};
pub use notify::{challenge_message, release_message, Notification, NotificationPort};
pub use runner::{SwitchEngine, SwitchExit, SwitchHandle, TickOutcome};
pub use types::*;
