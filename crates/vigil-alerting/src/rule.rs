//! Alert rule definitions: conditions, aggregation, scheduling, and
//! admin-time validation.

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use vigil_types::{MetricSample, MetricValue, Severity};

use crate::error::{AlertingError, AlertingResult};
use crate::escalation::EscalationPolicy;
use crate::notify::Channel;

/// Comparison applied between the observed metric value and the rule
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Contains,
    NotContains,
    Regex,
}

impl ConditionOperator {
    fn is_numeric(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    fn is_textual(self) -> bool {
        matches!(self, Self::Contains | Self::NotContains | Self::Regex)
    }

    /// Evaluate the condition. Returns an error detail when the operator
    /// and value kinds are incompatible.
    pub fn evaluate(self, value: &MetricValue, threshold: &MetricValue) -> Result<bool, String> {
        match self {
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => {
                let (v, t) = match (value.as_f64(), threshold.as_f64()) {
                    (Some(v), Some(t)) => (v, t),
                    _ => {
                        return Err(format!(
                            "operator {self:?} requires numeric value and threshold"
                        ))
                    }
                };
                Ok(match self {
                    Self::Gt => v > t,
                    Self::Gte => v >= t,
                    Self::Lt => v < t,
                    Self::Lte => v <= t,
                    _ => unreachable!(),
                })
            }
            Self::Eq => Ok(value == threshold),
            Self::Neq => Ok(value != threshold),
            Self::Contains | Self::NotContains => {
                let (v, t) = match (value.as_str(), threshold.as_str()) {
                    (Some(v), Some(t)) => (v, t),
                    _ => {
                        return Err(format!(
                            "operator {self:?} requires text value and threshold"
                        ))
                    }
                };
                let contains = v.contains(t);
                Ok(if self == Self::Contains { contains } else { !contains })
            }
            Self::Regex => {
                let (v, t) = match (value.as_str(), threshold.as_str()) {
                    (Some(v), Some(t)) => (v, t),
                    _ => return Err("regex operator requires text value and threshold".into()),
                };
                let re = Regex::new(t).map_err(|e| format!("invalid regex pattern: {e}"))?;
                Ok(re.is_match(v))
            }
        }
    }
}

/// How samples within a rule's time window collapse to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Last,
}

impl Aggregation {
    /// Collapse a window of samples. Returns `None` for an empty window.
    pub fn apply(self, samples: &[MetricSample]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        Some(match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Last => *values.last().unwrap(),
        })
    }
}

/// Evaluation window for aggregated rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationWindow {
    pub aggregation: Aggregation,
    /// Window length in seconds, looking back from the evaluation tick.
    pub window_secs: u32,
}

/// Hours and weekdays during which a rule is active. Days use ISO
/// numbering, Monday = 1 through Sunday = 7. The hour range is half-open,
/// `start_hour <= hour < end_hour` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
    pub days: Vec<u8>,
}

impl BusinessHours {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let day = now.weekday().number_from_monday() as u8;
        if !self.days.contains(&day) {
            return false;
        }
        let hour = now.hour();
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// An absolute interval during which a rule never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MaintenanceWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now < self.end
    }
}

/// When a rule may be evaluated at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSchedule {
    pub business_hours: Option<BusinessHours>,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,
}

impl RuleSchedule {
    /// Whether evaluation is permitted at `now`. Maintenance windows take
    /// precedence over business hours.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        if self.maintenance_windows.iter().any(|w| w.contains(now)) {
            return false;
        }
        match &self.business_hours {
            Some(hours) => hours.contains(now),
            None => true,
        }
    }
}

/// A secondary condition on another metric that mutes the rule when it
/// holds, e.g. do not page on error rate while a deploy flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionRule {
    pub metric: String,
    pub operator: ConditionOperator,
    pub threshold: MetricValue,
}

fn default_true() -> bool {
    true
}

/// A threshold rule over one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    /// Free-form grouping label, e.g. `"infrastructure"`. Carried onto
    /// alerts for filtering.
    #[serde(default)]
    pub category: Option<String>,
    pub metric: String,
    pub operator: ConditionOperator,
    pub threshold: MetricValue,
    /// How long the condition must hold continuously before an alert is
    /// raised. Zero fires on the first matching observation.
    #[serde(default)]
    pub duration_secs: u32,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub aggregation: Option<AggregationWindow>,
    /// Minimum gap between consecutive alerts from this rule.
    #[serde(default)]
    pub cooldown_secs: u32,
    /// Cap on alerts created in any trailing hour. `None` means uncapped.
    #[serde(default)]
    pub max_alerts_per_hour: Option<u32>,
    #[serde(default)]
    pub schedule: RuleSchedule,
    #[serde(default)]
    pub suppression_rules: Vec<SuppressionRule>,
    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        metric: impl Into<String>,
        operator: ConditionOperator,
        threshold: MetricValue,
        severity: Severity,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category: None,
            metric: metric.into(),
            operator,
            threshold,
            duration_secs: 0,
            severity,
            enabled: true,
            channels: vec![Channel::Email],
            recipients: Vec::new(),
            aggregation: None,
            cooldown_secs: 0,
            max_alerts_per_hour: None,
            schedule: RuleSchedule::default(),
            suppression_rules: Vec::new(),
            escalation: None,
        }
    }

    /// Admin-time validation. Rejects rules that could never evaluate
    /// cleanly so runtime evaluation only sees data errors.
    pub fn validate(&self) -> AlertingResult<()> {
        if self.id.is_empty() {
            return Err(AlertingError::Configuration("rule id must not be empty".into()));
        }
        if self.metric.is_empty() {
            return Err(AlertingError::Configuration(format!(
                "rule {}: metric must not be empty",
                self.id
            )));
        }
        if self.channels.is_empty() {
            return Err(AlertingError::Configuration(format!(
                "rule {}: at least one channel is required",
                self.id
            )));
        }
        if self.operator.is_numeric() && self.threshold.as_f64().is_none() {
            return Err(AlertingError::Configuration(format!(
                "rule {}: operator {:?} requires a numeric threshold",
                self.id, self.operator
            )));
        }
        if self.operator.is_textual() && self.threshold.as_str().is_none() {
            return Err(AlertingError::Configuration(format!(
                "rule {}: operator {:?} requires a text threshold",
                self.id, self.operator
            )));
        }
        if self.operator == ConditionOperator::Regex {
            let pattern = self.threshold.as_str().unwrap_or_default();
            Regex::new(pattern).map_err(|e| {
                AlertingError::Configuration(format!("rule {}: invalid regex: {e}", self.id))
            })?;
        }
        if let Some(window) = &self.aggregation {
            if window.window_secs == 0 {
                return Err(AlertingError::Configuration(format!(
                    "rule {}: aggregation window must be positive",
                    self.id
                )));
            }
        }
        if let Some(max) = self.max_alerts_per_hour {
            if max == 0 {
                return Err(AlertingError::Configuration(format!(
                    "rule {}: max_alerts_per_hour must be at least 1",
                    self.id
                )));
            }
        }
        if let Some(hours) = &self.schedule.business_hours {
            if hours.start_hour >= hours.end_hour || hours.end_hour > 24 {
                return Err(AlertingError::Configuration(format!(
                    "rule {}: business hours must satisfy start < end <= 24",
                    self.id
                )));
            }
            if hours.days.is_empty() || hours.days.iter().any(|d| !(1..=7).contains(d)) {
                return Err(AlertingError::Configuration(format!(
                    "rule {}: business hour days must be ISO weekdays 1..=7",
                    self.id
                )));
            }
        }
        for window in &self.schedule.maintenance_windows {
            if window.start >= window.end {
                return Err(AlertingError::Configuration(format!(
                    "rule {}: maintenance window start must precede end",
                    self.id
                )));
            }
        }
        if let Some(policy) = &self.escalation {
            policy.validate().map_err(|e| {
                AlertingError::Configuration(format!("rule {}: {e}", self.id))
            })?;
        }
        Ok(())
    }
}
