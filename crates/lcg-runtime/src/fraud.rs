//! Order-creation abuse checks and the order intake path that runs them.

use chrono::Duration;
use lcg_risk::{evaluate_account_velocity, FraudConfig, FraudSignal, RateDecision};
use lcg_schemas::{Account, Application, ApplicationKind, Order, OrderStatus, PaymentStatus};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::guard::StateTransitionGuard;
use crate::ports::Ports;

#[derive(Clone)]
pub struct FraudHeuristics {
    ports: Ports,
    cfg: FraudConfig,
    guard: StateTransitionGuard,
}

impl FraudHeuristics {
    pub fn new(ports: Ports, cfg: FraudConfig, guard: StateTransitionGuard) -> Self {
        Self { ports, cfg, guard }
    }

    /// Charge one order creation to `ip`. Rejected once the rolling 24h
    /// window already holds `ip_max_orders_24h` entries.
    pub async fn admit_ip(&self, ip: &str) -> GuardResult<()> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(GuardError::Validation("client ip is required".to_string()));
        }
        let now = self.ports.now();
        let key = format!("order_ip:{ip}");
        match self
            .ports
            .limiter
            .check_and_record(&key, self.cfg.ip_quota(), now)
            .await?
        {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after } => {
                warn!(
                    ip,
                    retry_after_secs = retry_after.num_seconds(),
                    "order creation rejected by ip velocity"
                );
                Err(GuardError::RateLimited { retry_after })
            }
        }
    }

    /// Per-account velocity over the last 24h. `None` when normal.
    pub async fn evaluate_account(&self, account_id: Uuid) -> GuardResult<Option<FraudSignal>> {
        let now = self.ports.now();
        let times = self
            .ports
            .orders
            .order_times_for_owner(account_id, now - Duration::hours(24))
            .await?;
        Ok(evaluate_account_velocity(&self.cfg, &times, now))
    }

    pub async fn flag_account_for_review(
        &self,
        account_id: Uuid,
        reason: &str,
    ) -> GuardResult<Account> {
        self.guard.flag_account_for_review(account_id, reason).await
    }

    /// Evaluate and flag in one step. Returns the signal that caused a flag.
    pub async fn review_account(&self, account_id: Uuid) -> GuardResult<Option<FraudSignal>> {
        let Some(signal) = self.evaluate_account(account_id).await? else {
            return Ok(None);
        };
        self.flag_account_for_review(account_id, &signal.reason()).await?;
        Ok(Some(signal))
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub owner_id: Uuid,
    pub kind: ApplicationKind,
    pub amount_cents: i64,
    pub client_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order: Order,
    pub application: Application,
    /// Set when this order pushed the owner over a velocity threshold.
    pub flagged: Option<String>,
}

#[derive(Clone)]
pub struct OrderIntake {
    ports: Ports,
    fraud: FraudHeuristics,
}

impl OrderIntake {
    pub fn new(ports: Ports, fraud: FraudHeuristics) -> Self {
        Self { ports, fraud }
    }

    /// Create an order with its draft application.
    ///
    /// Owners under review (`pending`) or `deactivated` cannot order. The IP
    /// check runs before anything is written; the account velocity check runs
    /// after, so the new order counts toward it.
    pub async fn create_order(&self, req: NewOrder) -> GuardResult<CreatedOrder> {
        if req.amount_cents < 0 {
            return Err(GuardError::Validation("amount must not be negative".to_string()));
        }
        let owner = self
            .ports
            .accounts
            .fetch_account(req.owner_id)
            .await?
            .ok_or_else(|| GuardError::not_found("account", req.owner_id))?;
        if !owner.status.is_in_good_standing() {
            return Err(GuardError::Unauthorized(format!(
                "account is {}; orders are blocked until review",
                owner.status.as_str()
            )));
        }

        self.fraud.admit_ip(&req.client_ip).await?;

        let now = self.ports.now();
        let order = Order {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            amount_cents: req.amount_cents,
            created_at: now,
            paid_at: None,
        };
        let application = Application::new_draft(req.kind, order.id, now);
        self.ports
            .orders
            .insert_order_with_application(&order, &application)
            .await?;
        info!(order_id = %order.id, owner_id = %owner.id, kind = req.kind.as_str(), "order created");
        self.ports
            .audit(
                "order_created",
                Some(owner.id),
                &order.id.to_string(),
                json!({ "application_id": application.id, "kind": req.kind.as_str() }),
            )
            .await;

        // The order exists at this point; a failed review is logged, not surfaced.
        let flagged = match self.fraud.review_account(owner.id).await {
            Ok(sig) => sig.map(|s| s.reason()),
            Err(err) => {
                warn!(owner_id = %owner.id, error = %err, "account velocity review failed");
                None
            }
        };

        Ok(CreatedOrder {
            order,
            application,
            flagged,
        })
    }
}
