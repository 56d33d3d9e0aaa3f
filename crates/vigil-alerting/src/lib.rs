//! # vigil-alerting
//!
//! Alert rules, the alert lifecycle, escalation, and notification fan-out.
//!
//! ## Architecture
//!
//! ```text
//!   MetricSource ──► RuleEngine ──► AlertStore ◄── admin surface
//!                        │              ▲  │        (ack / resolve /
//!                        │ fire         │  │         suppress)
//!                        ▼              │  ▼
//!               NotificationDispatcher  │ EscalationScheduler
//!                  │     │     │        │        │
//!                email  chat  pager ◄───┴────────┘
//! ```
//!
//! The rule engine raises alerts; operators move them through their
//! lifecycle on the store; the escalation scheduler advances whatever
//! stays open too long. All three share the store and the dispatcher.

#![deny(unsafe_code)]

pub mod alert;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod notify;
pub mod rule;
pub mod store;

pub use alert::{
    Alert, AlertId, AlertStatus, Notification, NotificationId, NotificationStatus,
};
pub use engine::RuleEngine;
pub use error::{AlertingError, AlertingResult};
pub use escalation::{
    EscalationAction, EscalationLevel, EscalationPolicy, EscalationScheduler,
};
pub use notify::{
    Channel, LogProvider, NotificationDispatcher, NotificationProvider, DEFAULT_SEND_TIMEOUT,
};
pub use rule::{
    AggregationWindow, Aggregation, AlertRule, BusinessHours, ConditionOperator,
    MaintenanceWindow, RuleSchedule, SuppressionRule,
};
pub use store::{AlertFilter, AlertStore};
