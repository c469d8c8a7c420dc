use chrono::{DateTime, Duration, Utc};

use crate::{FraudConfig, FraudSignal, FraudSignalKind};

/// Per-account order velocity check.
///
/// `order_times` are the creation timestamps of the account's orders (any
/// order, any age; the caller may pass a pre-filtered 24h slice). The hourly
/// burst is checked first because it is the sharper signal.
///
/// Returns `None` when the account looks normal. These are advisory signals:
/// the caller decides what flagging means.
pub fn evaluate_account_velocity(
    cfg: &FraudConfig,
    order_times: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Option<FraudSignal> {
    let last_hour = count_since(order_times, now - Duration::hours(1), now);
    if cfg.account_max_orders_1h > 0 && last_hour >= cfg.account_max_orders_1h {
        return Some(
            FraudSignal::new(FraudSignalKind::HourlyVelocity)
                .with_evidence("orders_1h", last_hour.to_string())
                .with_evidence("threshold", cfg.account_max_orders_1h.to_string()),
        );
    }

    let last_day = count_since(order_times, now - Duration::hours(24), now);
    if cfg.account_max_orders_24h > 0 && last_day >= cfg.account_max_orders_24h {
        return Some(
            FraudSignal::new(FraudSignalKind::DailyVelocity)
                .with_evidence("orders_24h", last_day.to_string())
                .with_evidence("threshold", cfg.account_max_orders_24h.to_string()),
        );
    }

    None
}

fn count_since(times: &[DateTime<Utc>], cutoff: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    times.iter().filter(|t| **t > cutoff && **t <= now).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn three_orders_in_an_hour_is_normal() {
        let times: Vec<_> = (0..3).map(|i| now() - Duration::minutes(i * 10)).collect();
        assert!(evaluate_account_velocity(&FraudConfig::sane_defaults(), &times, now()).is_none());
    }

    #[test]
    fn four_orders_in_an_hour_is_suspicious() {
        let times: Vec<_> = (0..4).map(|i| now() - Duration::minutes(i * 10)).collect();
        let sig = evaluate_account_velocity(&FraudConfig::sane_defaults(), &times, now()).unwrap();
        assert_eq!(sig.kind, FraudSignalKind::HourlyVelocity);
        assert_eq!(sig.evidence.get("orders_1h").map(String::as_str), Some("4"));
    }

    #[test]
    fn seven_orders_spread_over_a_day_is_suspicious() {
        let times: Vec<_> = (0..7).map(|i| now() - Duration::hours(i * 3)).collect();
        let sig = evaluate_account_velocity(&FraudConfig::sane_defaults(), &times, now()).unwrap();
        assert_eq!(sig.kind, FraudSignalKind::DailyVelocity);
        assert!(sig.reason().starts_with("FRAUD_ORDER_VELOCITY_24H"));
    }

    #[test]
    fn orders_older_than_a_day_do_not_count() {
        let times: Vec<_> = (0..10)
            .map(|i| now() - Duration::hours(25 + i))
            .collect();
        assert!(evaluate_account_velocity(&FraudConfig::sane_defaults(), &times, now()).is_none());
    }
}
