//! # vigil-service
//!
//! The composed monitoring pipeline: detector training and detection,
//! rule evaluation, and alert escalation, each running on its own
//! periodic loop over shared state owned by one [`VigilService`].
//!
//! ```text
//!             ┌───────────── VigilService ─────────────┐
//!   training ─┤ DetectorRegistry ── anomalies ─┐       │
//!  detection ─┤                                ▼       │
//!      rules ─┤ RuleEngine ──────────────► AlertStore  │──► VigilEvent
//! escalation ─┤ EscalationScheduler ◄──────────┘       │    broadcast
//!             └──────── NotificationDispatcher ────────┘
//! ```
//!
//! Loops are spawned by [`VigilService::start`] and halted by
//! [`VigilService::stop`]; every tick entry point also exists as a public
//! method taking an explicit timestamp so behavior is testable without
//! waiting on wall-clock intervals.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod service;

pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use events::VigilEvent;
pub use service::{HealthSummary, VigilService};
