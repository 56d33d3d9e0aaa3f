use thiserror::Error;

/// Errors from the alerting subsystem.
///
/// Rate limiting (cooldown, max-alerts) is expected control flow and does
/// not appear here; per-rule evaluation failures are logged at the rule
/// boundary and never abort sibling rules.
#[derive(Debug, Error)]
pub enum AlertingError {
    #[error("invalid alert rule: {0}")]
    Configuration(String),

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("alert not found: {0}")]
    AlertNotFound(String),

    #[error("invalid alert transition: {from} -> {action}")]
    InvalidTransition { from: String, action: String },

    #[error("evaluation failed for metric {metric}: {detail}")]
    Evaluation { metric: String, detail: String },

    #[error("dispatch failed on channel {channel}: {detail}")]
    Dispatch { channel: String, detail: String },
}

/// Convenience type alias for alerting results.
pub type AlertingResult<T> = Result<T, AlertingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = AlertingError::InvalidTransition {
            from: "resolved".into(),
            action: "acknowledge".into(),
        };
        assert!(e.to_string().contains("resolved"));
        assert!(e.to_string().contains("acknowledge"));

        let e = AlertingError::Dispatch {
            channel: "email".into(),
            detail: "timed out".into(),
        };
        assert!(e.to_string().contains("email"));
    }
}
