use crate::messaging::PersistenceEvent;
use actix_web::http::StatusCode;
use actix_web::ResponseError;
use thiserror::Error;

/// Represents errors that can occur in the relay.
///
/// Source failures are recovered by the listener supervisor and never reach consumers.
/// Malformed events are dropped where they are detected. Persistence failures are logged by
/// the background writer. The remaining variants surface through the HTTP layer or bootstrap.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl From<tokio::sync::broadcast::error::SendError<PersistenceEvent>> for RelayError {
    fn from(err: tokio::sync::broadcast::error::SendError<PersistenceEvent>) -> Self {
        RelayError::Event(err.to_string())
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
