//! Outbound notification boundary.
//!
//! The engine only ever builds a [`Notification`] and hands it to a
//! [`NotificationPort`]. Transports (SMTP, test doubles) live elsewhere.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{NotificationError, SwitchConfig};

/// One outbound message to one or more addressees.
#[derive(Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: Vec<String>,
    pub subject: String,
    pub body: Vec<u8>,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bodies carry either a live check-in code or the secret itself.
        f.debug_struct("Notification")
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("body", &format_args!("<{} bytes>", self.body.len()))
            .finish()
    }
}

/// Outbound-message capability consumed by the engine.
///
/// Implementations must be object-safe so the engine can hold an
/// `Arc<dyn NotificationPort>`. A returned error is fatal to the engine;
/// implementations should not retry on its behalf.
#[async_trait::async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(&self, message: Notification) -> Result<(), NotificationError>;
}

/// Challenge sent to the operator's own address.
pub fn challenge_message(cfg: &SwitchConfig, code: &str, deadline: DateTime<Utc>) -> Notification {
    let body = format!(
        "Your Dead Man's Switch here, are you still there?\n\
         Make a request before {deadline}:\n\n    {url}\n",
        deadline = deadline.to_rfc3339_opts(SecondsFormat::Secs, true),
        url = cfg.check_in_url(code),
    );
    Notification {
        to: vec![cfg.operator.clone()],
        subject: "Dead Man's Switch check-in".to_string(),
        body: body.into_bytes(),
    }
}

/// Release of the secret to every recipient.
pub fn release_message(cfg: &SwitchConfig) -> Notification {
    let mut body = format!(
        "{}'s Dead Man's Switch here, the secret is:\n",
        cfg.operator
    )
    .into_bytes();
    body.extend_from_slice(cfg.secret.as_bytes());
    Notification {
        to: cfg.recipients.clone(),
        subject: format!("{}'s Dead Man's Switch", cfg.operator),
        body,
    }
}
