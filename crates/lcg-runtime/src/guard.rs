//! StateTransitionGuard: the only write path for status columns.
//!
//! Every request runs the pure whitelist first. A rejected request touches
//! nothing. An accepted one is written with a compare-and-set on the old
//! status, then its side effects run.

use lcg_lifecycle::{
    application_effects, order_effects, payment_effects, transition, Lifecycle, SideEffect,
};
use lcg_schemas::{
    Account, AccountStatus, Application, ApplicationKind, ApplicationStatus, GuardEvent, Order,
    OrderStatus, PaymentStatus,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::notices;
use crate::ports::Ports;

#[derive(Clone)]
pub struct StateTransitionGuard {
    ports: Ports,
}

impl StateTransitionGuard {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }

    // -----------------------------------------------------------------------
    // Order status
    // -----------------------------------------------------------------------

    pub async fn transition_order(
        &self,
        order_id: Uuid,
        requested: OrderStatus,
        actor_id: Option<Uuid>,
    ) -> GuardResult<Order> {
        let mut order = self
            .ports
            .orders
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| GuardError::not_found("order", order_id))?;

        let from = order.status;
        let to = transition(from, requested)?;

        if !self
            .ports
            .orders
            .update_order_status(order_id, from, to)
            .await?
        {
            return Err(GuardError::Conflict(format!(
                "order {order_id} changed status concurrently"
            )));
        }
        order.status = to;

        self.record_status_change(order_id, from, to, actor_id).await;

        for effect in order_effects(to) {
            self.run_order_effect(*effect, &order).await?;
        }
        Ok(order)
    }

    async fn run_order_effect(&self, effect: SideEffect, order: &Order) -> GuardResult<()> {
        match effect {
            SideEffect::UpgradeOwnerToVip => self.upgrade_owner_to_vip(order).await,
            SideEffect::RequestSurvey => {
                self.request_survey(order).await;
                Ok(())
            }
            SideEffect::ComputeComplianceDeadlines => {
                if let Err(err) = self.ports.compliance.compute_deadlines(order.id).await {
                    warn!(order_id = %order.id, error = ?err, "compliance deadline computation failed");
                }
                Ok(())
            }
            SideEffect::ClearComplianceDeadlines => {
                if let Err(err) = self.ports.compliance.clear_deadlines(order.id).await {
                    warn!(order_id = %order.id, error = ?err, "compliance deadline clear failed");
                }
                Ok(())
            }
            SideEffect::StampPaidAt | SideEffect::ClearAbandonment => Ok(()),
        }
    }

    /// Only `active` owners are promoted. Pending/deactivated accounts are
    /// under review and keep their status.
    async fn upgrade_owner_to_vip(&self, order: &Order) -> GuardResult<()> {
        let Some(mut owner) = self.ports.accounts.fetch_account(order.owner_id).await? else {
            warn!(order_id = %order.id, owner_id = %order.owner_id, "order owner missing; vip upgrade skipped");
            return Ok(());
        };
        if owner.status != AccountStatus::Active {
            return Ok(());
        }
        let from = owner.status;
        owner.status = AccountStatus::Vip;
        if !self.ports.accounts.save_account(&owner).await? {
            return Err(GuardError::Conflict(format!(
                "account {} changed concurrently during vip upgrade",
                owner.id
            )));
        }
        self.record_status_change(owner.id, from, owner.status, None).await;
        Ok(())
    }

    async fn request_survey(&self, order: &Order) {
        let now = self.ports.now();
        self.ports.events.publish(GuardEvent::SurveyRequested {
            order_id: order.id,
            account_id: order.owner_id,
            at: now,
        });
        match self.ports.accounts.fetch_account(order.owner_id).await {
            Ok(Some(owner)) => {
                self.ports
                    .notify(notices::survey_request(&owner.email, owner.locale, order.id))
                    .await;
            }
            Ok(None) => {}
            Err(err) => warn!(order_id = %order.id, error = ?err, "survey recipient lookup failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Payment status
    // -----------------------------------------------------------------------

    pub async fn transition_payment(
        &self,
        order_id: Uuid,
        requested: PaymentStatus,
        actor_id: Option<Uuid>,
    ) -> GuardResult<Order> {
        let mut order = self
            .ports
            .orders
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| GuardError::not_found("order", order_id))?;

        let from = order.payment_status;
        let to = transition(from, requested)?;

        let paid_at = payment_effects(to)
            .contains(&SideEffect::StampPaidAt)
            .then(|| self.ports.now());

        if !self
            .ports
            .orders
            .update_payment_status(order_id, from, to, paid_at)
            .await?
        {
            return Err(GuardError::Conflict(format!(
                "order {order_id} changed payment status concurrently"
            )));
        }
        order.payment_status = to;
        if paid_at.is_some() {
            order.paid_at = paid_at;
        }

        self.record_status_change(order_id, from, to, actor_id).await;
        Ok(order)
    }

    // -----------------------------------------------------------------------
    // Application status
    // -----------------------------------------------------------------------

    pub async fn transition_application(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        requested: ApplicationStatus,
        actor_id: Option<Uuid>,
    ) -> GuardResult<Application> {
        let mut app = self
            .ports
            .applications
            .fetch_application(kind, app_id)
            .await?
            .ok_or_else(|| GuardError::not_found("application", app_id))?;

        let from = app.status;
        let to = transition(from, requested)?;
        let clear = application_effects(from, to).contains(&SideEffect::ClearAbandonment);
        let now = self.ports.now();

        if !self
            .ports
            .applications
            .update_application_status(kind, app_id, from, to, now, clear)
            .await?
        {
            return Err(GuardError::Conflict(format!(
                "application {app_id} changed status concurrently"
            )));
        }
        app.status = to;
        app.last_updated = now;
        if clear {
            app.abandoned_at = None;
        }

        self.record_status_change(app_id, from, to, actor_id).await;
        Ok(app)
    }

    // -----------------------------------------------------------------------
    // Account status
    // -----------------------------------------------------------------------

    pub async fn transition_account(
        &self,
        account_id: Uuid,
        requested: AccountStatus,
        actor_id: Option<Uuid>,
    ) -> GuardResult<Account> {
        let mut account = self.load_account(account_id).await?;
        let from = account.status;
        let to = transition(from, requested)?;

        account.status = to;
        if to == AccountStatus::Active {
            account.security_otp_required = false;
        }
        self.save(&mut account).await?;

        self.record_status_change(account_id, from, to, actor_id).await;
        Ok(account)
    }

    /// Put an account under manual review: `pending`, OTP required for
    /// sensitive operations, one timestamped note. Deactivated accounts keep
    /// their status but still get the note and the flag.
    pub async fn flag_account_for_review(
        &self,
        account_id: Uuid,
        reason: &str,
    ) -> GuardResult<Account> {
        let mut account = self.load_account(account_id).await?;
        let now = self.ports.now();
        let from = account.status;

        if from != AccountStatus::Deactivated {
            account.status = AccountStatus::Pending;
        }
        account.security_otp_required = true;
        account.append_note(now, &format!("flagged for review: {reason}"));
        self.save(&mut account).await?;

        warn!(account_id = %account_id, reason, "account flagged for review");
        if from != account.status {
            self.record_status_change(account_id, from, account.status, None).await;
        }
        self.ports
            .audit(
                "account_flagged",
                None,
                &account_id.to_string(),
                json!({ "reason": reason, "from": from.as_str() }),
            )
            .await;
        self.ports.events.publish(GuardEvent::AccountFlagged {
            account_id,
            reason: reason.to_string(),
            at: now,
        });
        Ok(account)
    }

    // -----------------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------------

    async fn load_account(&self, account_id: Uuid) -> GuardResult<Account> {
        self.ports
            .accounts
            .fetch_account(account_id)
            .await?
            .ok_or_else(|| GuardError::not_found("account", account_id))
    }

    async fn save(&self, account: &mut Account) -> GuardResult<()> {
        if !self.ports.accounts.save_account(account).await? {
            return Err(GuardError::Conflict(format!(
                "account {} changed concurrently",
                account.id
            )));
        }
        account.version += 1;
        Ok(())
    }

    async fn record_status_change<S: Lifecycle>(
        &self,
        id: Uuid,
        from: S,
        to: S,
        actor_id: Option<Uuid>,
    ) {
        let entity = S::ENTITY;
        info!(entity = entity.as_str(), id = %id, from = from.label(), to = to.label(), "status changed");
        self.ports
            .audit(
                "status_changed",
                actor_id,
                &id.to_string(),
                json!({ "entity": entity.as_str(), "from": from.label(), "to": to.label() }),
            )
            .await;
        self.ports.events.publish(GuardEvent::StatusChanged {
            entity,
            id,
            from: from.label().to_string(),
            to: to.label().to_string(),
            at: self.ports.now(),
        });
    }
}
