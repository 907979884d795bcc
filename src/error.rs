use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoutingError>;

/// Errors raised while preparing or running a routing batch.
///
/// A cable that cannot be routed is not an error: it is reported through a
/// failed `RouteResult` and the batch carries on.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Invalid raceway record {id}: {reason}")]
    InvalidRaceway { id: String, reason: String },

    #[error("Invalid cable record {id}: {reason}")]
    InvalidCable { id: String, reason: String },

    #[error("Invalid routing configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Routing worker is no longer running")]
    WorkerDisconnected,

    #[error("Failed to install tracing: {0}")]
    Tracing(String),
}

#[cfg(feature = "python")]
impl From<RoutingError> for pyo3::PyErr {
    fn from(error: RoutingError) -> Self {
        match error {
            RoutingError::Io(_) => pyo3::exceptions::PyIOError::new_err(error.to_string()),
            _ => pyo3::exceptions::PyValueError::new_err(error.to_string()),
        }
    }
}
