//! Check-in callback listener.
//!
//! Every request, whatever its method or path, is a check-in attempt: the
//! path without its leading `/` is the token. The answer is always an empty
//! `200 OK`, so a caller learns nothing about whether the token matched.
//!
//! Middleware layers (tracing) are **not** applied here; `main.rs` attaches
//! them after this call so tests can use the bare router.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    Router,
};
use dms_engine::SwitchEngine;
use tracing::debug;

pub fn build_router(engine: SwitchEngine) -> Router {
    Router::new().fallback(check_in).with_state(engine)
}

/// Token carried by a callback URI. The query string is ignored.
pub fn callback_token(uri: &Uri) -> &str {
    let path = uri.path();
    path.strip_prefix('/').unwrap_or(path)
}

// ---------------------------------------------------------------------------
// ANY /*
// ---------------------------------------------------------------------------

pub(crate) async fn check_in(State(engine): State<SwitchEngine>, uri: Uri) -> StatusCode {
    let accepted = engine.report_check_in(callback_token(&uri)).await;
    debug!(accepted, "callback handled");
    StatusCode::OK
}
