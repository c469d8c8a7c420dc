//! MutationStagingService: profile updates where sensitive fields wait for an
//! OTP while everything else applies immediately.
//!
//! A new staged change replaces any outstanding one (the earlier fields are
//! dropped, not merged). Writes go through the account version check, so two
//! racing requests cannot both land.
//!
//! Accounts under review (`pending`) or `deactivated` keep immediate edits
//! but cannot stage or confirm sensitive fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration};
use lcg_config::StagingSettings;
use lcg_lifecycle::{classify, Classification};
use lcg_schemas::{Account, AccountStatus, GuardEvent, OtpPurpose, StagedChange};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::notices;
use crate::otp::{OtpReceipt, OtpService};
use crate::ports::Ports;

/// Whether the confirmation code reached the mail queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpDelivery {
    Queued { expires_at: DateTime<chrono::Utc> },
    /// The issue bucket for this IP is full; call `resend` later.
    Throttled { retry_after: Duration },
    /// Code issued but the mail queue refused it; call `resend`.
    NotQueued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Nothing needed an OTP. `applied` lists the changed keys.
    Applied { applied: Vec<String> },
    /// OTP_REQUIRED: `gated` fields wait for `confirm`; `applied` keys were
    /// written already.
    OtpRequired {
        gated: Vec<&'static str>,
        applied: Vec<String>,
        delivery: OtpDelivery,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Applied { fields: Vec<&'static str> },
    /// OTP_INVALID with attempts left before review.
    Invalid { attempts_remaining: u32 },
    /// Attempt limit reached: staged change discarded, account set to
    /// `pending` for review.
    Escalated,
}

#[derive(Clone)]
pub struct MutationStagingService {
    ports: Ports,
    otp: OtpService,
    settings: StagingSettings,
    admin_notify_email: Option<String>,
}

impl MutationStagingService {
    pub fn new(
        ports: Ports,
        otp: OtpService,
        settings: StagingSettings,
        admin_notify_email: Option<String>,
    ) -> Self {
        Self {
            ports,
            otp,
            settings,
            admin_notify_email,
        }
    }

    /// Classify a profile update request and stage it.
    pub async fn submit(
        &self,
        account_id: Uuid,
        requested: &BTreeMap<String, String>,
        ip: &str,
    ) -> GuardResult<StageOutcome> {
        if requested.keys().any(|k| k.trim().is_empty()) {
            return Err(GuardError::Validation("empty profile field name".to_string()));
        }
        let account = self.load(account_id).await?;
        let classification = classify(requested, |k| account.profile_value(k));
        self.stage_loaded(account, classification, ip).await
    }

    /// Apply `classification.immediate` now and stage `classification.sensitive`
    /// behind a `profile_change` OTP. On a locked account the immediate fields
    /// are still written before `Unauthorized` is returned.
    pub async fn stage(
        &self,
        account_id: Uuid,
        classification: Classification,
        ip: &str,
    ) -> GuardResult<StageOutcome> {
        let account = self.load(account_id).await?;
        self.stage_loaded(account, classification, ip).await
    }

    async fn stage_loaded(
        &self,
        mut account: Account,
        classification: Classification,
        ip: &str,
    ) -> GuardResult<StageOutcome> {
        let now = self.ports.now();
        let Classification {
            immediate,
            sensitive,
        } = classification;

        let applied: Vec<String> = immediate.keys().cloned().collect();
        for (key, value) in immediate {
            account.profile.insert(key, value);
        }

        let locked = sensitive_edits_locked(&account);
        if sensitive.is_empty() || locked {
            if !applied.is_empty() {
                self.save(&mut account).await?;
                info!(account_id = %account.id, fields = ?applied, "profile fields updated");
            }
            if locked && !sensitive.is_empty() {
                warn!(
                    account_id = %account.id,
                    status = account.status.as_str(),
                    "sensitive profile change refused"
                );
                return Err(locked_error(&account));
            }
            return Ok(StageOutcome::Applied { applied });
        }

        if let Some(prev) = &account.pending_change {
            info!(
                account_id = %account.id,
                replaced = ?prev.field_names(),
                "outstanding staged change replaced"
            );
        }
        let staged = StagedChange {
            account_id: account.id,
            fields: sensitive,
            attempts: 0,
            requested_at: now,
            expires_at: now + self.settings.expiry,
        };
        let gated = staged.field_names();
        account.pending_change = Some(staged);
        self.save(&mut account).await?;
        info!(account_id = %account.id, gated = ?gated, applied = ?applied, "profile change staged");

        let delivery = self.deliver_code(&account, ip).await?;
        Ok(StageOutcome::OtpRequired {
            gated,
            applied,
            delivery,
        })
    }

    /// Check `code` against the staged change. A code that verifies but then
    /// loses the account write is spent: the caller gets `Conflict` and the
    /// staged change stays, so `resend` starts a new round.
    pub async fn confirm(&self, account_id: Uuid, code: &str) -> GuardResult<ConfirmOutcome> {
        let mut account = self.load(account_id).await?;
        let now = self.ports.now();

        if sensitive_edits_locked(&account) {
            return Err(locked_error(&account));
        }
        let Some(mut staged) = account.pending_change.take() else {
            return Err(GuardError::Expired("staged change"));
        };

        if staged.is_expired(now) {
            self.save(&mut account).await?;
            info!(account_id = %account_id, "expired staged change cleared");
            return Err(GuardError::Expired("staged change"));
        }

        if self
            .otp
            .verify(&account.email, code, OtpPurpose::ProfileChange)
            .await?
        {
            let fields = staged.field_names();
            for (field, value) in std::mem::take(&mut staged.fields) {
                account.profile.insert(field.as_str().to_string(), value);
            }
            self.save(&mut account).await?;
            self.after_confirmed(&account, &fields).await;
            return Ok(ConfirmOutcome::Applied { fields });
        }

        staged.attempts += 1;
        if staged.attempts >= self.settings.max_attempts {
            self.escalate(&mut account, staged.attempts).await?;
            return Ok(ConfirmOutcome::Escalated);
        }

        let attempts_remaining = self.settings.max_attempts - staged.attempts;
        account.pending_change = Some(staged);
        self.save(&mut account).await?;
        info!(account_id = %account_id, attempts_remaining, "staged change confirmation failed");
        Ok(ConfirmOutcome::Invalid { attempts_remaining })
    }

    /// Self-service abort. `true` when something was discarded.
    pub async fn cancel_pending(&self, account_id: Uuid) -> GuardResult<bool> {
        let mut account = self.load(account_id).await?;
        if account.pending_change.take().is_none() {
            return Ok(false);
        }
        self.save(&mut account).await?;
        info!(account_id = %account_id, "staged change cancelled");
        Ok(true)
    }

    /// Send a fresh code for the outstanding staged change. Attempts and
    /// expiry are left as they are.
    pub async fn resend(&self, account_id: Uuid, ip: &str) -> GuardResult<OtpReceipt> {
        let mut account = self.load(account_id).await?;
        let now = self.ports.now();
        if sensitive_edits_locked(&account) {
            return Err(locked_error(&account));
        }
        match &account.pending_change {
            None => Err(GuardError::not_found("staged change for account", account_id)),
            Some(staged) if staged.is_expired(now) => {
                account.pending_change = None;
                self.save(&mut account).await?;
                Err(GuardError::Expired("staged change"))
            }
            Some(_) => {
                self.otp
                    .send_code(&account.email, account.locale, OtpPurpose::ProfileChange, ip)
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------------

    async fn deliver_code(&self, account: &Account, ip: &str) -> GuardResult<OtpDelivery> {
        match self
            .otp
            .send_code(&account.email, account.locale, OtpPurpose::ProfileChange, ip)
            .await
        {
            Ok(r) if r.queued => Ok(OtpDelivery::Queued {
                expires_at: r.expires_at,
            }),
            Ok(_) => Ok(OtpDelivery::NotQueued),
            Err(GuardError::RateLimited { retry_after }) => {
                Ok(OtpDelivery::Throttled { retry_after })
            }
            Err(other) => Err(other),
        }
    }

    async fn after_confirmed(&self, account: &Account, fields: &[&'static str]) {
        let now = self.ports.now();
        info!(account_id = %account.id, fields = ?fields, "staged change confirmed");
        self.ports
            .audit(
                "profile_change_confirmed",
                Some(account.id),
                &account.id.to_string(),
                json!({ "fields": fields }),
            )
            .await;
        self.ports.events.publish(GuardEvent::ProfileChangeConfirmed {
            account_id: account.id,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            at: now,
        });
        if let Some(admin) = &self.admin_notify_email {
            self.ports
                .notify(notices::admin_profile_change(admin, account.id, fields))
                .await;
        }
    }

    /// Discard the staged change and move the account to `pending`.
    async fn escalate(&self, account: &mut Account, attempts: u32) -> GuardResult<()> {
        let now = self.ports.now();
        let from = account.status;
        let reason = format!("profile change confirmation failed {attempts} times");

        account.pending_change = None;
        account.status = AccountStatus::Pending;
        account.append_note(now, &format!("security review: {reason}"));
        self.save(account).await?;

        warn!(account_id = %account.id, attempts, "staged change attempts exhausted; account under review");
        self.ports
            .audit(
                "security_review",
                None,
                &account.id.to_string(),
                json!({ "reason": reason, "from": from.as_str() }),
            )
            .await;
        self.ports.events.publish(GuardEvent::StatusChanged {
            entity: lcg_schemas::GuardedEntity::Account,
            id: account.id,
            from: from.as_str().to_string(),
            to: account.status.as_str().to_string(),
            at: now,
        });
        self.ports.events.publish(GuardEvent::SecurityReview {
            account_id: account.id,
            reason,
            at: now,
        });
        Ok(())
    }

    async fn load(&self, account_id: Uuid) -> GuardResult<Account> {
        self.ports
            .accounts
            .fetch_account(account_id)
            .await?
            .ok_or_else(|| GuardError::not_found("account", account_id))
    }

    async fn save(&self, account: &mut Account) -> GuardResult<()> {
        if !self.ports.accounts.save_account(account).await? {
            warn!(account_id = %account.id, "account write lost a concurrent update");
            return Err(GuardError::Conflict(format!(
                "account {} changed concurrently; retry",
                account.id
            )));
        }
        account.version += 1;
        Ok(())
    }
}

fn sensitive_edits_locked(account: &Account) -> bool {
    matches!(
        account.status,
        AccountStatus::Pending | AccountStatus::Deactivated
    )
}

fn locked_error(account: &Account) -> GuardError {
    GuardError::Unauthorized(format!(
        "account {} is {}; sensitive changes need review",
        account.id,
        account.status.as_str()
    ))
}
