//! Outbox dispatcher: drains queued emails through the [`Mailer`](crate::ports::Mailer).
//!
//! Services only ever enqueue. Delivery happens here, off the request path,
//! with exponential backoff and a dead-letter state after `max_attempts`.

use chrono::{DateTime, Duration, Utc};
use lcg_config::OutboxSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GuardResult;
use crate::ports::Ports;

/// Longest wait between two attempts of one message.
const MAX_BACKOFF_HOURS: i64 = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub claimed: u32,
    pub sent: u32,
    pub retried: u32,
    pub dead: u32,
}

/// `base * 2^(attempts-1)`, capped. `attempts` counts the failure just seen.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let factor = 1i64 << exp;
    let cap_secs = MAX_BACKOFF_HOURS * 3600;
    let secs = base.num_seconds().max(1).saturating_mul(factor);
    Duration::seconds(secs.min(cap_secs))
}

#[derive(Clone)]
pub struct OutboxDispatcher {
    ports: Ports,
    settings: OutboxSettings,
}

impl OutboxDispatcher {
    pub fn new(ports: Ports, settings: OutboxSettings) -> Self {
        Self { ports, settings }
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    /// Claim one batch of due messages and try each once.
    pub async fn dispatch_once(&self) -> GuardResult<DispatchReport> {
        let now = self.ports.now();
        let claim_lease = Duration::minutes(5);
        let batch = self
            .ports
            .outbox
            .claim_due(now, self.settings.batch_limit, claim_lease)
            .await?;

        let mut report = DispatchReport {
            claimed: batch.len() as u32,
            ..DispatchReport::default()
        };

        for msg in batch {
            let attempts = msg.attempts + 1;
            match self.ports.mailer.send(&msg.email).await {
                Ok(()) => {
                    self.ports.outbox.mark_sent(msg.id, attempts, now).await?;
                    debug!(outbox_id = %msg.id, category = %msg.email.category, "email sent");
                    report.sent += 1;
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    let retry_at = self.retry_at(now, attempts);
                    self.ports
                        .outbox
                        .mark_failed(msg.id, attempts, &error, retry_at)
                        .await?;
                    match retry_at {
                        Some(at) => {
                            warn!(outbox_id = %msg.id, attempts, retry_at = %at, error = %error, "email send failed; will retry");
                            report.retried += 1;
                        }
                        None => {
                            warn!(outbox_id = %msg.id, attempts, error = %error, "email dead-lettered");
                            report.dead += 1;
                        }
                    }
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                sent = report.sent,
                retried = report.retried,
                dead = report.dead,
                "outbox batch dispatched"
            );
        }
        Ok(report)
    }

    fn retry_at(&self, now: DateTime<Utc>, attempts: u32) -> Option<DateTime<Utc>> {
        if attempts >= self.settings.max_attempts {
            return None;
        }
        Some(now + backoff_delay(self.settings.base_backoff, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::seconds(30);
        assert_eq!(backoff_delay(base, 1), Duration::seconds(30));
        assert_eq!(backoff_delay(base, 2), Duration::seconds(60));
        assert_eq!(backoff_delay(base, 4), Duration::seconds(240));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(
            backoff_delay(Duration::seconds(30), 40),
            Duration::hours(MAX_BACKOFF_HOURS)
        );
    }
}
