//! dms-mail
//!
//! SMTP-backed [`NotificationPort`] and the one-time startup preflight.
//!
//! No retries here: a failed send is returned to the engine, which treats it
//! as fatal.

use std::time::Duration;

use dms_config::{parse_address, SmtpSecurity, SmtpSettings};
use dms_engine::{Notification, NotificationError, NotificationPort, SwitchError};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Upper bound on one complete SMTP exchange.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(60);

const PREFLIGHT_BODY: &str = "Test to check your credentials. Have a nice day :)";

// ---------------------------------------------------------------------------
// SmtpNotifier
// ---------------------------------------------------------------------------

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    /// `host:port`, for logs and errors.
    target: String,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .field("target", &self.target)
            .finish()
    }
}

impl SmtpNotifier {
    /// Build the transport. Does not touch the network.
    pub fn new(smtp: &SmtpSettings, operator: &str) -> Result<Self, SwitchError> {
        let from = parse_address(operator)?;
        let builder = match smtp.security {
            SmtpSecurity::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host),
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            }
            SmtpSecurity::Plain => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &smtp.host,
            )),
        }
        .map_err(|e| SwitchError::ConfigInvalid(format!("smtp host '{}': {e}", smtp.host)))?;

        let transport = builder
            .port(smtp.port)
            .credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ))
            .timeout(Some(smtp.timeout))
            .build();

        Ok(Self {
            transport,
            from,
            target: format!("{}:{}", smtp.host, smtp.port),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait::async_trait]
impl NotificationPort for SmtpNotifier {
    async fn send(&self, message: Notification) -> Result<(), NotificationError> {
        let recipients = message.to.len();
        let email = build_message(&self.from, message)?;

        match tokio::time::timeout(SEND_TIMEOUT, self.transport.send(email)).await {
            Ok(Ok(resp)) => {
                debug!(target = %self.target, recipients, code = %resp.code(), "mail accepted");
                Ok(())
            }
            Ok(Err(e)) => Err(NotificationError::Transport(format!("{}: {e}", self.target))),
            Err(_) => Err(NotificationError::Transport(format!(
                "{}: no answer within {}s",
                self.target,
                SEND_TIMEOUT.as_secs()
            ))),
        }
    }
}

/// Render a [`Notification`] as a plain-text mail from `from` to every addressee.
pub fn build_message(from: &Mailbox, n: Notification) -> Result<Message, NotificationError> {
    if n.to.is_empty() {
        return Err(NotificationError::Message("no addressees".to_string()));
    }

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(n.subject)
        .header(ContentType::TEXT_PLAIN);
    for to in &n.to {
        let mailbox = parse_address(to).map_err(|e| NotificationError::Message(e.to_string()))?;
        builder = builder.to(mailbox);
    }
    builder
        .body(n.body)
        .map_err(|e| NotificationError::Message(e.to_string()))
}

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

/// One-time startup check, run before any engine state exists:
///
/// 1. TCP reachability of `host:port` within the configured timeout.
/// 2. SMTP greeting / EHLO on a fresh transport connection.
/// 3. A test mail to the operator, which exercises the credentials.
///
/// Returns the ready notifier on success.
pub async fn preflight(smtp: &SmtpSettings, operator: &str) -> Result<SmtpNotifier, SwitchError> {
    let notifier = SmtpNotifier::new(smtp, operator)?;
    let target = notifier.target.clone();
    let fail = |what: String| SwitchError::Preflight(format!("{target}: {what}"));

    match tokio::time::timeout(smtp.timeout, TcpStream::connect(&target)).await {
        Ok(Ok(_stream)) => debug!(%target, "smtp reachable"),
        Ok(Err(e)) => return Err(fail(format!("unreachable: {e}"))),
        Err(_) => {
            return Err(fail(format!(
                "unreachable: no connection within {}s",
                smtp.timeout.as_secs()
            )))
        }
    }

    match tokio::time::timeout(smtp.timeout, notifier.transport.test_connection()).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => return Err(fail("server refused the connection test".to_string())),
        Ok(Err(e)) => return Err(fail(format!("connection test failed: {e}"))),
        Err(_) => {
            return Err(fail(format!(
                "no SMTP greeting within {}s",
                smtp.timeout.as_secs()
            )))
        }
    }

    let test = Notification {
        to: vec![operator.to_string()],
        subject: "Dead Man's Switch credentials test".to_string(),
        body: PREFLIGHT_BODY.as_bytes().to_vec(),
    };
    notifier
        .send(test)
        .await
        .map_err(|e| fail(format!("test mail rejected: {e}")))?;

    info!(%target, "smtp preflight passed");
    Ok(notifier)
}
