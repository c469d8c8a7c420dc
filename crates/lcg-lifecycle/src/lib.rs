//! lcg-lifecycle
//!
//! Pure lifecycle rules for orders, payments, applications and accounts:
//! - transition whitelists and the side effects an accepted transition implies
//! - immediate vs OTP-gated profile change classification
//! - abandoned-draft timing (mark, remind, delete)
//!
//! Deterministic, no IO, no wall clock. Callers pass `now`.

mod reclaim;
mod staging;
mod transitions;

pub use reclaim::{ReclaimPolicy, ReminderDecision};
pub use staging::{classify, Classification};
pub use transitions::{
    application_effects, order_effects, payment_effects, transition, Lifecycle, SideEffect,
    TransitionError,
};
