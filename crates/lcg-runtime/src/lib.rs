//! lcg-runtime
//!
//! The lifecycle guard services wired over collaborator ports:
//! - [`StateTransitionGuard`]: whitelisted status writes + side effects
//! - [`MutationStagingService`]: immediate vs OTP-gated profile changes
//! - [`OtpService`]: single-use, expiring, purpose-scoped codes
//! - [`FraudHeuristics`] / [`OrderIntake`]: per-IP and per-account velocity
//! - [`AbandonmentReclaimer`]: mark / remind / delete stale drafts
//! - [`CascadeDeleter`]: all-or-nothing dependent-row removal
//! - [`OutboxDispatcher`]: async email delivery with backoff
//!
//! Storage, mail, audit, clock and events are injected through [`Ports`].

mod cascade;
mod error;
mod fraud;
mod guard;
mod limiter;
pub mod notices;
mod otp;
mod outbox;
mod ports;
mod reclaim;
mod staging;

pub use cascade::CascadeDeleter;
pub use error::{GuardError, GuardResult};
pub use fraud::{CreatedOrder, FraudHeuristics, NewOrder, OrderIntake};
pub use guard::StateTransitionGuard;
pub use limiter::InMemoryRateLimiter;
pub use otp::{IssuedOtp, OtpReceipt, OtpService};
pub use outbox::{backoff_delay, DispatchReport, OutboxDispatcher};
pub use ports::*;
pub use reclaim::{AbandonmentReclaimer, SweepOutcome, SweepReport, SWEEP_LEASE_NAME};
pub use staging::{ConfirmOutcome, MutationStagingService, OtpDelivery, StageOutcome};

use lcg_config::GuardConfig;

/// Every service built from one set of ports and one config.
#[derive(Clone)]
pub struct GuardRuntime {
    pub ports: Ports,
    pub transitions: StateTransitionGuard,
    pub otp: OtpService,
    pub staging: MutationStagingService,
    pub fraud: FraudHeuristics,
    pub intake: OrderIntake,
    pub reclaimer: AbandonmentReclaimer,
    pub cascade: CascadeDeleter,
    pub outbox: OutboxDispatcher,
}

impl GuardRuntime {
    pub fn new(ports: Ports, cfg: &GuardConfig) -> Self {
        let transitions = StateTransitionGuard::new(ports.clone());
        let otp = OtpService::new(ports.clone(), cfg.otp.clone());
        let staging = MutationStagingService::new(
            ports.clone(),
            otp.clone(),
            cfg.staging.clone(),
            cfg.admin_notify_email.clone(),
        );
        let fraud = FraudHeuristics::new(ports.clone(), cfg.fraud.clone(), transitions.clone());
        let intake = OrderIntake::new(ports.clone(), fraud.clone());
        let reclaimer = AbandonmentReclaimer::new(ports.clone(), cfg.reclaim.clone());
        let cascade = CascadeDeleter::new(ports.clone());
        let outbox = OutboxDispatcher::new(ports.clone(), cfg.outbox.clone());
        Self {
            ports,
            transitions,
            otp,
            staging,
            fraud,
            intake,
            reclaimer,
            cascade,
            outbox,
        }
    }

    /// Hourly maintenance of the shared rate-limit store.
    pub async fn prune_rate_limits(&self) -> GuardResult<u64> {
        let dropped = self.ports.limiter.prune(self.ports.now()).await?;
        tracing::debug!(dropped, "rate limit entries pruned");
        Ok(dropped)
    }
}
