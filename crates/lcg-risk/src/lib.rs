//! lcg-risk
//!
//! Order-abuse heuristics and windowed rate limiting:
//! - sliding-window event log per key (per-IP order creation, OTP issuance)
//! - shared decision rule for storage-backed limiters
//! - per-account order velocity (1h burst, 24h volume)
//!
//! Deterministic, pure logic. No IO, no wall clock. Callers pass `now`.

mod engine;
mod types;
mod window;

pub use engine::evaluate_account_velocity;
pub use types::*;
pub use window::{decide, SlidingWindowLog};
