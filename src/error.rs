use http::StatusCode;
use thiserror::Error;

/// Errors that terminate the outer batch call.
///
/// Dispatch failures (transport errors, deadline elapses, bad redirect
/// targets) never appear here - they are materialised as synthetic responses
/// inside the result vector and the outer call still succeeds.
#[derive(Debug, Error)]
pub enum RrpError {
    /// The envelope itself is unusable; carries the status reported to the
    /// outer caller.
    #[error("{message}")]
    Envelope {
        status: StatusCode,
        message: String,
    },

    /// The join barrier released with the wrong number of records.
    #[error("expected {expected} responses for this batch but only received {received}")]
    ResponseCountMismatch { expected: usize, received: usize },

    /// A panic was recovered while encoding the reply.
    #[error("panic while processing request")]
    EncodePanic,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RrpError {
    pub fn envelope(status: StatusCode, message: impl Into<String>) -> Self {
        RrpError::Envelope {
            status,
            message: message.into(),
        }
    }

    /// Status code reported to the outer caller for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RrpError::Envelope { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type RrpResult<T> = Result<T, RrpError>;
