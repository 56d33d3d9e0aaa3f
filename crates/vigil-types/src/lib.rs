//! # vigil-types
//!
//! Shared vocabulary for the Vigil anomaly detection and alerting pipeline.
//!
//! This crate defines the types that cross crate boundaries: metric samples
//! and values, severity levels, and the capability traits through which the
//! pipeline pulls metric data from the outside world. It carries no logic
//! beyond what the types themselves need.

#![deny(unsafe_code)]

pub mod sample;
pub mod severity;
pub mod source;

pub use sample::{MetricSample, MetricValue};
pub use severity::Severity;
pub use source::{HistoricalMetricSource, MetricSource};
