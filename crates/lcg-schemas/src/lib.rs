//! lcg-schemas
//!
//! Shared data model for the lifecycle guard: status vocabularies, persisted
//! entity shapes, outbox rows and published events. No IO.

mod events;
mod model;
mod status;

pub use events::{GuardEvent, GuardedEntity};
pub use model::{
    Account, Application, Order, OtpToken, OutboundEmail, OutboxMessage, OutboxStatus,
    StagedChange,
};
pub use status::{
    AccountStatus, ApplicationKind, ApplicationStatus, Locale, OrderStatus, OtpPurpose,
    PaymentStatus, SensitiveField,
};
