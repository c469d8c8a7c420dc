//! One-time passcodes: single use, expiring, scoped to (subject, purpose).

use chrono::{DateTime, Utc};
use lcg_config::OtpSettings;
use lcg_risk::RateDecision;
use lcg_schemas::{Locale, OtpPurpose, OtpToken};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::notices;
use crate::ports::Ports;

/// A freshly issued code. The code itself only travels to the mail queue.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedOtp {
    pub token_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedOtp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedOtp")
            .field("token_id", &self.token_id)
            .field("code", &"******")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What a caller may learn about a delivered code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpReceipt {
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// `false` when the mail queue rejected the message.
    pub queued: bool,
}

#[derive(Clone)]
pub struct OtpService {
    ports: Ports,
    settings: OtpSettings,
}

impl OtpService {
    pub fn new(ports: Ports, settings: OtpSettings) -> Self {
        Self { ports, settings }
    }

    pub fn settings(&self) -> &OtpSettings {
        &self.settings
    }

    /// Issue a code with the configured TTL after charging the
    /// `(purpose, ip)` bucket.
    pub async fn issue(
        &self,
        subject_email: &str,
        purpose: OtpPurpose,
        ip: &str,
    ) -> GuardResult<IssuedOtp> {
        self.issue_with_ttl(subject_email, purpose, ip, self.settings.code_ttl)
            .await
    }

    pub async fn issue_with_ttl(
        &self,
        subject_email: &str,
        purpose: OtpPurpose,
        ip: &str,
        ttl: chrono::Duration,
    ) -> GuardResult<IssuedOtp> {
        let email = normalize_email(subject_email)?;
        let now = self.ports.now();

        let key = format!("otp:{}:{}", purpose.as_str(), ip);
        if let RateDecision::Limited { retry_after } = self
            .ports
            .limiter
            .check_and_record(&key, self.settings.issue_quota, now)
            .await?
        {
            info!(purpose = purpose.as_str(), ip, "otp issuance rate limited");
            return Err(GuardError::RateLimited { retry_after });
        }

        let token = OtpToken {
            id: Uuid::new_v4(),
            subject_email: email,
            code: self.ports.codes.six_digits(),
            purpose,
            expires_at: now + ttl,
            verified: false,
            created_at: now,
        };
        self.ports.otp.insert_token(&token).await?;
        debug!(token_id = %token.id, purpose = purpose.as_str(), "otp issued");

        Ok(IssuedOtp {
            token_id: token.id,
            code: token.code,
            expires_at: token.expires_at,
        })
    }

    /// Issue and queue the code email.
    pub async fn send_code(
        &self,
        subject_email: &str,
        locale: Locale,
        purpose: OtpPurpose,
        ip: &str,
    ) -> GuardResult<OtpReceipt> {
        let issued = self.issue(subject_email, purpose, ip).await?;
        let queued = self
            .ports
            .notify(notices::otp_code(
                subject_email,
                locale,
                purpose,
                &issued.code,
                issued.expires_at,
            ))
            .await;
        Ok(OtpReceipt {
            token_id: issued.token_id,
            expires_at: issued.expires_at,
            queued,
        })
    }

    /// `true` exactly once per issued code. Only the newest unverified,
    /// unexpired token matching (subject, code, purpose) is considered.
    ///
    /// With `revoke_older_on_verify`, a successful verify also removes every
    /// other outstanding code for the same subject and purpose.
    pub async fn verify(
        &self,
        subject_email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> GuardResult<bool> {
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        let email = normalize_email(subject_email)?;
        let now = self.ports.now();

        let Some(token) = self
            .ports
            .otp
            .find_newest_match(&email, code, purpose, now)
            .await?
        else {
            return Ok(false);
        };

        if !self.ports.otp.mark_verified(token.id).await? {
            // Lost the race to a concurrent verify of the same code.
            return Ok(false);
        }

        if self.settings.revoke_older_on_verify {
            let revoked = self.ports.otp.revoke_outstanding(&email, purpose).await?;
            if revoked > 0 {
                debug!(purpose = purpose.as_str(), revoked, "older otp codes revoked");
            }
        }
        Ok(true)
    }
}

fn normalize_email(raw: &str) -> GuardResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(GuardError::Validation("subject email is malformed".to_string()));
    }
    Ok(email)
}
