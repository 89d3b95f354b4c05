//! dms entry point.
//!
//! Thin wiring only: settings, SMTP preflight, secret acquisition, engine
//! start, and the callback listener. The switch logic lives in `dms-engine`;
//! the handler lives in `routes.rs`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{body::Body, http::Request};
use clap::Parser;
use dms_config::{
    load_layered_yaml, load_layered_yaml_from_strings, overlay, read_secret, read_secret_file,
    resolve_settings, Overrides, Settings, SECRET_SENTINEL,
};
use dms_daemon::{routes, shutdown::shutdown_signal};
use dms_engine::{Secret, SwitchEngine, SwitchExit};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "dms", version)]
#[command(about = "Mail a secret to your recipients if you stop checking in", long_about = None)]
struct Args {
    /// YAML config layers, merged in order (repeatable).
    #[arg(long = "config")]
    config: Vec<PathBuf>,

    /// Operator address: receives challenges, sends everything.
    #[arg(long = "email")]
    operator: Option<String>,

    /// Comma-separated list of recipients.
    #[arg(long)]
    recipients: Option<String>,

    /// Interval between evaluations, in days.
    #[arg(long, conflicts_with = "interval_secs")]
    interval: Option<u64>,

    /// Interval between evaluations, in seconds.
    #[arg(long = "interval-secs")]
    interval_secs: Option<u64>,

    /// Unanswered challenges tolerated before the secret is released.
    #[arg(long)]
    forgive: Option<u32>,

    #[arg(long = "code-length")]
    code_length: Option<usize>,

    /// Callback listener address, e.g. 0.0.0.0:9999.
    #[arg(long)]
    listen: Option<String>,

    /// Base URL placed in challenge mails.
    #[arg(long = "public-url")]
    public_url: Option<String>,

    /// Read the secret from this file instead of stdin.
    #[arg(long = "secret-file")]
    secret_file: Option<PathBuf>,

    /// SMTP server host.
    #[arg(long)]
    mxserv: Option<String>,

    #[arg(long)]
    mxport: Option<u16>,

    /// wrapper | starttls | plain
    #[arg(long = "smtp-security")]
    smtp_security: Option<String>,

    #[arg(long = "smtp-username")]
    smtp_username: Option<String>,

    /// NAME of the environment variable holding the SMTP password.
    #[arg(long = "password-env")]
    password_env: Option<String>,
}

impl Args {
    fn overrides(&self) -> Result<Overrides> {
        let interval_secs = match (self.interval, self.interval_secs) {
            (Some(days), _) => Some(
                days.checked_mul(SECS_PER_DAY)
                    .with_context(|| format!("CONFIG_INVALID: interval of {days} days overflows"))?,
            ),
            (None, secs) => secs,
        };
        Ok(Overrides {
            operator: self.operator.clone(),
            recipients: self.recipients.clone(),
            interval_secs,
            forgive: self.forgive,
            code_length: self.code_length,
            listen: self.listen.clone(),
            public_url: self.public_url.clone(),
            secret_file: self.secret_file.clone(),
            smtp_host: self.mxserv.clone(),
            smtp_port: self.mxport,
            smtp_security: self.smtp_security.clone(),
            smtp_username: self.smtp_username.clone(),
            smtp_password_env: self.password_env.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();
    init_tracing();
    print_banner();

    let settings = load_settings(&args)?;
    info!(
        config_hash = %settings.config_hash,
        recipients = settings.recipients.len(),
        interval_secs = settings.interval.as_secs(),
        forgiveness = settings.forgiveness,
        "config loaded"
    );

    let notifier = dms_mail::preflight(&settings.smtp, &settings.operator)
        .await
        .context("smtp preflight")?;

    let secret = acquire_secret(&settings).await?;
    info!(bytes = secret.len(), "secret saved");

    // Bind before arming so a busy port never leaves a switch running blind.
    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("bind {}", settings.listen))?;

    let handle = SwitchEngine::start(settings.switch_config(secret), Arc::new(notifier))
        .context("start switch")?;
    let engine = handle.engine();

    let app = routes::build_router(engine.clone()).layer(
        TraceLayer::new_for_http()
            // The path is the check-in code; keep it out of the span.
            .make_span_with(|req: &Request<Body>| {
                tracing::info_span!("callback", method = %req.method())
            })
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    info!(
        listen = %settings.listen,
        public_url = %settings.public_url,
        "listening for check-ins"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine.clone(), tokio::signal::ctrl_c()))
        .await
        .context("server crashed")?;

    engine.stop();
    match handle.join().await.context("switch failed")? {
        SwitchExit::Stopped => info!("switch stopped"),
        SwitchExit::Triggered => info!("secret released; nothing left to guard"),
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn print_banner() {
    eprintln!("dms {} :: dead man's switch", env!("CARGO_PKG_VERSION"));
    eprintln!("Your reason, your business.\n");
}

fn load_settings(args: &Args) -> Result<Settings> {
    let loaded = if args.config.is_empty() {
        load_layered_yaml_from_strings(&[])?
    } else {
        load_layered_yaml(args.config.as_slice())?
    };
    let loaded = overlay(loaded, args.overrides()?.to_layer())?;
    Ok(resolve_settings(&loaded)?)
}

async fn acquire_secret(settings: &Settings) -> Result<Secret> {
    if let Some(path) = &settings.secret_file {
        return read_secret_file(path);
    }
    eprintln!("Enter the secret, ending with a line containing only {SECRET_SENTINEL}:");
    tokio::task::spawn_blocking(|| read_secret(std::io::stdin().lock()))
        .await
        .context("secret reader task")?
}
