//! Plain-text email bodies for the messages the guard itself queues.

use chrono::{DateTime, Utc};
use lcg_schemas::{ApplicationKind, Locale, OtpPurpose, OutboundEmail};
use uuid::Uuid;

pub const CATEGORY_OTP: &str = "otp";
pub const CATEGORY_REMINDER: &str = "abandonment_reminder";
pub const CATEGORY_SURVEY: &str = "survey";
pub const CATEGORY_ADMIN: &str = "admin_profile_change";

fn purpose_label(purpose: OtpPurpose, locale: Locale) -> &'static str {
    match (purpose, locale) {
        (OtpPurpose::AccountVerification, Locale::Es) => "verificar tu cuenta",
        (OtpPurpose::AccountVerification, Locale::En) => "verify your account",
        (OtpPurpose::PasswordChange, Locale::Es) => "cambiar tu contraseña",
        (OtpPurpose::PasswordChange, Locale::En) => "change your password",
        (OtpPurpose::ProfileChange, Locale::Es) => "confirmar cambios en tu perfil",
        (OtpPurpose::ProfileChange, Locale::En) => "confirm changes to your profile",
        (OtpPurpose::PasswordReset, Locale::Es) => "restablecer tu contraseña",
        (OtpPurpose::PasswordReset, Locale::En) => "reset your password",
    }
}

pub fn otp_code(
    to: &str,
    locale: Locale,
    purpose: OtpPurpose,
    code: &str,
    expires_at: DateTime<Utc>,
) -> OutboundEmail {
    let what = purpose_label(purpose, locale);
    let (subject, body) = match locale {
        Locale::Es => (
            format!("Tu código: {code}"),
            format!(
                "Usa el código {code} para {what}.\nCaduca el {}.\nSi no lo solicitaste, ignora este mensaje.",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
        ),
        Locale::En => (
            format!("Your code: {code}"),
            format!(
                "Use code {code} to {what}.\nIt expires at {}.\nIf you did not request it, ignore this message.",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
        ),
    };
    OutboundEmail {
        to: to.to_string(),
        subject,
        body,
        category: CATEGORY_OTP.to_string(),
    }
}

pub fn abandonment_reminder(
    to: &str,
    locale: Locale,
    kind: ApplicationKind,
    app_id: Uuid,
    reminder_number: u32,
    hours_remaining: i64,
) -> OutboundEmail {
    let (subject, body) = match locale {
        Locale::Es => (
            format!("Tu solicitud {} sigue pendiente", kind_label(kind, locale)),
            format!(
                "Aviso {reminder_number}: tu solicitud {app_id} está incompleta.\n\
                 Se eliminará en {hours_remaining} horas si no la retomas."
            ),
        ),
        Locale::En => (
            format!("Your {} application is still waiting", kind_label(kind, locale)),
            format!(
                "Reminder {reminder_number}: application {app_id} is incomplete.\n\
                 It will be deleted in {hours_remaining} hours unless you resume it."
            ),
        ),
    };
    OutboundEmail {
        to: to.to_string(),
        subject,
        body,
        category: CATEGORY_REMINDER.to_string(),
    }
}

pub fn survey_request(to: &str, locale: Locale, order_id: Uuid) -> OutboundEmail {
    let (subject, body) = match locale {
        Locale::Es => (
            "¿Cómo lo hicimos?".to_string(),
            format!("Tu pedido {order_id} está completo. Cuéntanos tu experiencia."),
        ),
        Locale::En => (
            "How did we do?".to_string(),
            format!("Order {order_id} is complete. Tell us about your experience."),
        ),
    };
    OutboundEmail {
        to: to.to_string(),
        subject,
        body,
        category: CATEGORY_SURVEY.to_string(),
    }
}

/// Internal notice; field names only, never the new values.
pub fn admin_profile_change(to: &str, account_id: Uuid, fields: &[&str]) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Profile change confirmed for {account_id}"),
        body: format!(
            "Account {account_id} confirmed a change to: {}.",
            fields.join(", ")
        ),
        category: CATEGORY_ADMIN.to_string(),
    }
}

fn kind_label(kind: ApplicationKind, locale: Locale) -> &'static str {
    match (kind, locale) {
        (ApplicationKind::Llc, _) => "LLC",
        (ApplicationKind::Maintenance, Locale::Es) => "de mantenimiento",
        (ApplicationKind::Maintenance, Locale::En) => "maintenance",
    }
}
