//! Typed, validated switch settings.
//!
//! # Keys
//!
//! ```yaml
//! operator: me@example.com
//! recipients: [heir@example.com, lawyer@example.com]   # or "a@x, b@y"
//! interval_secs: 86400
//! forgive: 1
//! code_length: 16
//! listen: 0.0.0.0:9999
//! public_url: https://switch.example.com:9999
//! secret_file: /path/to/secret          # optional; stdin otherwise
//! smtp:
//!   host: smtp.example.com
//!   port: 465
//!   security: wrapper                   # wrapper | starttls | plain
//!   username: me@example.com            # defaults to operator
//!   password_env: DMS_SMTP_PASSWORD     # NAME of the env var, never the value
//!   timeout_secs: 5
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dms_engine::{Secret, SwitchConfig, SwitchError, DEFAULT_CODE_LENGTH};
use lettre::message::Mailbox;
use serde::Deserialize;
use serde_json::Value;

use crate::layered::LoadedConfig;

pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_FORGIVE: u32 = 1;
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9999";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:9999";
pub const DEFAULT_SMTP_PORT: u16 = 465;
pub const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PASSWORD_ENV: &str = "DMS_SMTP_PASSWORD";

// ---------------------------------------------------------------------------
// Raw (deserialized) shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawRecipients {
    List(Vec<String>),
    Csv(String),
}

impl RawRecipients {
    fn into_vec(self) -> Vec<String> {
        match self {
            RawRecipients::List(v) => v,
            RawRecipients::Csv(s) => s.split(',').map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSmtp {
    host: Option<String>,
    port: Option<u16>,
    security: Option<SmtpSecurity>,
    username: Option<String>,
    password_env: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSettings {
    operator: Option<String>,
    recipients: Option<RawRecipients>,
    interval_secs: Option<u64>,
    forgive: Option<u32>,
    code_length: Option<usize>,
    listen: Option<String>,
    public_url: Option<String>,
    secret_file: Option<PathBuf>,
    smtp: RawSmtp,
}

// ---------------------------------------------------------------------------
// Validated shape
// ---------------------------------------------------------------------------

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS from the first byte (port 465).
    Wrapper,
    /// Plain connection upgraded with STARTTLS (port 587).
    Starttls,
    /// No TLS at all. Local relays and tests only.
    Plain,
}

impl SmtpSecurity {
    fn default_for_port(port: u16) -> Self {
        if port == 465 {
            SmtpSecurity::Wrapper
        } else {
            SmtpSecurity::Starttls
        }
    }
}

/// Mail transport settings. **The password is redacted in `Debug`.**
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: String,
    pub password: String,
    /// Connect/IO timeout, also used for the preflight dial.
    pub timeout: Duration,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub operator: String,
    pub recipients: Vec<String>,
    pub interval: Duration,
    pub forgiveness: u32,
    pub code_length: usize,
    pub listen: SocketAddr,
    pub public_url: String,
    pub secret_file: Option<PathBuf>,
    pub smtp: SmtpSettings,
    /// Hash of the effective merged configuration (see `layered`).
    pub config_hash: String,
}

impl Settings {
    /// Build the engine configuration once the secret has been acquired.
    pub fn switch_config(&self, secret: Secret) -> SwitchConfig {
        SwitchConfig::new(
            self.operator.clone(),
            self.recipients.clone(),
            self.interval,
            self.forgiveness,
            secret,
        )
        .with_code_length(self.code_length)
        .with_public_url(self.public_url.clone())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn invalid(msg: impl Into<String>) -> SwitchError {
    SwitchError::ConfigInvalid(msg.into())
}

/// Parse one address as an RFC 5322 mailbox (`a@b` or `Name <a@b>`).
pub fn parse_address(raw: &str) -> Result<Mailbox, SwitchError> {
    let raw = raw.trim();
    Mailbox::from_str(raw).map_err(|e| invalid(format!("malformed address '{raw}': {e}")))
}

/// Resolve and validate settings from a loaded config, reading the SMTP
/// password from the environment variable the config names.
pub fn resolve_settings(loaded: &LoadedConfig) -> Result<Settings, SwitchError> {
    resolve_settings_with(loaded, |name| std::env::var(name).ok())
}

/// Like [`resolve_settings`] with an injectable environment lookup.
pub fn resolve_settings_with<F>(loaded: &LoadedConfig, env: F) -> Result<Settings, SwitchError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw: RawSettings = serde_json::from_value(loaded.config_json.clone())
        .map_err(|e| invalid(format!("config shape: {e}")))?;

    let operator = raw
        .operator
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("operator address is required"))?;
    parse_address(&operator)?;

    let recipients: Vec<String> = raw
        .recipients
        .map(RawRecipients::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if recipients.is_empty() {
        return Err(invalid("recipient list must not be empty"));
    }
    for r in &recipients {
        parse_address(r)?;
    }

    let interval_secs = raw.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS);
    if interval_secs == 0 {
        return Err(invalid("check-in interval must be positive"));
    }

    let code_length = raw.code_length.unwrap_or(DEFAULT_CODE_LENGTH);
    if code_length == 0 {
        return Err(invalid("code_length must be at least 1"));
    }

    let listen_raw = raw.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let listen: SocketAddr = listen_raw
        .parse()
        .map_err(|e| invalid(format!("listen address '{listen_raw}': {e}")))?;

    let public_url = raw
        .public_url
        .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string();
    if !(public_url.starts_with("http://") || public_url.starts_with("https://")) {
        return Err(invalid(format!("public_url '{public_url}' must be an http(s) URL")));
    }

    let smtp = resolve_smtp(raw.smtp, &operator, &env)?;

    Ok(Settings {
        operator,
        recipients,
        interval: Duration::from_secs(interval_secs),
        forgiveness: raw.forgive.unwrap_or(DEFAULT_FORGIVE),
        code_length,
        listen,
        public_url,
        secret_file: raw.secret_file,
        smtp,
        config_hash: loaded.config_hash.clone(),
    })
}

fn resolve_smtp<F>(raw: RawSmtp, operator: &str, env: &F) -> Result<SmtpSettings, SwitchError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = raw
        .host
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("smtp.host is required"))?;
    let port = raw.port.unwrap_or(DEFAULT_SMTP_PORT);
    if port == 0 {
        return Err(invalid("smtp.port must be non-zero"));
    }

    let password_env = raw
        .password_env
        .unwrap_or_else(|| DEFAULT_PASSWORD_ENV.to_string());
    // Report the NAME only, never the value.
    let password = env(&password_env)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            invalid(format!(
                "smtp password env var '{password_env}' is not set or empty"
            ))
        })?;

    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_SMTP_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(invalid("smtp.timeout_secs must be positive"));
    }

    Ok(SmtpSettings {
        security: raw
            .security
            .unwrap_or_else(|| SmtpSecurity::default_for_port(port)),
        username: raw.username.unwrap_or_else(|| bare_address(operator)),
        host,
        port,
        password,
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// `Name <a@b>` -> `a@b`; bare addresses pass through.
fn bare_address(raw: &str) -> String {
    Mailbox::from_str(raw)
        .map(|m| m.email.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

// ---------------------------------------------------------------------------
// CLI overrides
// ---------------------------------------------------------------------------

/// Values given on the command line. `None` leaves the YAML value in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub operator: Option<String>,
    /// Comma-separated, as typed on the command line.
    pub recipients: Option<String>,
    pub interval_secs: Option<u64>,
    pub forgive: Option<u32>,
    pub code_length: Option<usize>,
    pub listen: Option<String>,
    pub public_url: Option<String>,
    pub secret_file: Option<PathBuf>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_security: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password_env: Option<String>,
}

impl Overrides {
    /// Render as a config layer; unset fields become `null` and merge away.
    pub fn to_layer(&self) -> Value {
        serde_json::json!({
            "operator": self.operator,
            "recipients": self.recipients,
            "interval_secs": self.interval_secs,
            "forgive": self.forgive,
            "code_length": self.code_length,
            "listen": self.listen,
            "public_url": self.public_url,
            "secret_file": self.secret_file,
            "smtp": {
                "host": self.smtp_host,
                "port": self.smtp_port,
                "security": self.smtp_security,
                "username": self.smtp_username,
                "password_env": self.smtp_password_env,
            },
        })
    }
}
