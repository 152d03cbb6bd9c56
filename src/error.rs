//! Error types for the buffer drain operator

use thiserror::Error;

use crate::controller::drain::DrainErrors;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A list/query needed for a drain pass failed. The whole pass is aborted.
    #[error("failed to observe {what}: {source}")]
    ObservationError {
        what: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    DrainErrors(#[from] DrainErrors),
}

impl Error {
    pub fn observation(what: &'static str, source: impl Into<Error>) -> Self {
        Error::ObservationError {
            what,
            source: Box::new(source.into()),
        }
    }

    /// Whether the controller should retry soon rather than back off
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 409 || e.code >= 500,
            Error::KubeError(_) => true,
            Error::ObservationError { source, .. } => source.is_retriable(),
            Error::DrainErrors(errors) => errors.iter().any(|e| e.kind.is_retriable()),
            Error::SerializationError(_) | Error::ConfigError(_) | Error::ValidationError(_) => {
                false
            }
        }
    }

    /// Short label used for the reconcile error metric
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::ObservationError { .. } => "observation",
            Error::DrainErrors(_) => "drain",
        }
    }
}
