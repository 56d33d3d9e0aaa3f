use thiserror::Error;

/// Errors from the detection subsystem.
///
/// Per-entity failures during a tick are logged at the entity boundary and
/// never abort sibling detectors; only admin operations surface errors to
/// the caller.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("invalid detector configuration: {0}")]
    Configuration(String),

    #[error("detector not found: {0}")]
    DetectorNotFound(String),

    #[error("insufficient data for detector {detector}: {got} samples, need {need}")]
    InsufficientData {
        detector: String,
        got: usize,
        need: usize,
    },

    #[error("evaluation failed for metric {metric}: {detail}")]
    Evaluation { metric: String, detail: String },
}

/// Convenience type alias for detection results.
pub type DetectionResult<T> = Result<T, DetectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = DetectionError::InsufficientData {
            detector: "api-latency".into(),
            got: 12,
            need: 50,
        };
        assert!(e.to_string().contains("api-latency"));
        assert!(e.to_string().contains("12"));

        let e = DetectionError::Configuration("thresholds out of order".into());
        assert!(e.to_string().contains("thresholds"));
    }
}
