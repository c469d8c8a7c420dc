//! Status vocabularies for every guarded entity.
//!
//! Each enum round-trips through the lowercase snake_case strings stored in
//! the database (`as_str` / `parse`) and through serde with the same spelling.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Filed,
    DocumentsReady,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Filed,
        OrderStatus::DocumentsReady,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Filed => "filed",
            OrderStatus::DocumentsReady => "documents_ready",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("invalid order status: {s}"))
    }
}

// ---------------------------------------------------------------------------
// PaymentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::Overdue,
        PaymentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("invalid payment status: {s}"))
    }
}

// ---------------------------------------------------------------------------
// ApplicationStatus / ApplicationKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    Filed,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 4] = [
        ApplicationStatus::Draft,
        ApplicationStatus::Submitted,
        ApplicationStatus::Filed,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Filed => "filed",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("invalid application status: {s}"))
    }
}

/// LLC formation and annual maintenance applications share one lifecycle;
/// only the backing table differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationKind {
    Llc,
    Maintenance,
}

impl ApplicationKind {
    pub const ALL: [ApplicationKind; 2] = [ApplicationKind::Llc, ApplicationKind::Maintenance];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationKind::Llc => "llc",
            ApplicationKind::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("invalid application kind: {s}"))
    }
}

// ---------------------------------------------------------------------------
// AccountStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Under review. New orders and guarded mutations are blocked.
    Pending,
    Active,
    Vip,
    Deactivated,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 4] = [
        AccountStatus::Pending,
        AccountStatus::Active,
        AccountStatus::Vip,
        AccountStatus::Deactivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Vip => "vip",
            AccountStatus::Deactivated => "deactivated",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("invalid account status: {s}"))
    }

    /// Accounts allowed to place orders and stage profile changes.
    pub fn is_in_good_standing(&self) -> bool {
        matches!(self, AccountStatus::Active | AccountStatus::Vip)
    }
}

// ---------------------------------------------------------------------------
// OtpPurpose
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    AccountVerification,
    PasswordChange,
    ProfileChange,
    PasswordReset,
}

impl OtpPurpose {
    pub const ALL: [OtpPurpose; 4] = [
        OtpPurpose::AccountVerification,
        OtpPurpose::PasswordChange,
        OtpPurpose::ProfileChange,
        OtpPurpose::PasswordReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::AccountVerification => "account_verification",
            OtpPurpose::PasswordChange => "password_change",
            OtpPurpose::ProfileChange => "profile_change",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("invalid otp purpose: {s}"))
    }
}

// ---------------------------------------------------------------------------
// SensitiveField
// ---------------------------------------------------------------------------

/// Closed set of account attributes whose non-empty → non-empty change must be
/// confirmed with a `profile_change` OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveField {
    FirstName,
    LastName,
    IdNumber,
    IdType,
    Phone,
}

impl SensitiveField {
    pub const ALL: [SensitiveField; 5] = [
        SensitiveField::FirstName,
        SensitiveField::LastName,
        SensitiveField::IdNumber,
        SensitiveField::IdType,
        SensitiveField::Phone,
    ];

    /// Profile key as submitted by clients and stored in `accounts.profile`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitiveField::FirstName => "first_name",
            SensitiveField::LastName => "last_name",
            SensitiveField::IdNumber => "id_number",
            SensitiveField::IdType => "id_type",
            SensitiveField::Phone => "phone",
        }
    }

    /// `None` for any key outside the sensitive set.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == key)
    }
}

// ---------------------------------------------------------------------------
// Locale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    Es,
    En,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Es => "es",
            Locale::En => "en",
        }
    }

    /// Unknown tags fall back to the default locale.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "en-us" | "en-gb" => Locale::En,
            _ => Locale::Es,
        }
    }
}

macro_rules! display_via_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_via_as_str!(
    OrderStatus,
    PaymentStatus,
    ApplicationStatus,
    ApplicationKind,
    AccountStatus,
    OtpPurpose,
    SensitiveField,
    Locale
);
