use thiserror::Error;

/// Errors surfaced by the composed service.
///
/// Subsystem errors pass through transparently; the service adds only its
/// own configuration and lifecycle failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid service configuration: {0}")]
    Configuration(String),

    #[error("service already running")]
    AlreadyRunning,

    #[error(transparent)]
    Detection(#[from] vigil_detection::DetectionError),

    #[error(transparent)]
    Alerting(#[from] vigil_alerting::AlertingError),
}

/// Convenience type alias for service results.
pub type ServiceResult<T> = Result<T, ServiceError>;
