//! dms-daemon library target.
//!
//! Exposes the callback router and shutdown trigger for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod routes;
pub mod shutdown;
