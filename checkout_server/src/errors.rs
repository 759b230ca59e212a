use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use checkout_engine::{sweepers::SweepError, ConfirmationError, ErrorKind, StatusUpdateError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Invalid query parameters: {0}")]
    InvalidQuery(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("{0}")]
    ConfirmationFailed(#[from] ConfirmationError),
    #[error("{0}")]
    StatusUpdateFailed(#[from] StatusUpdateError),
    #[error("Sweep failed. {0}")]
    SweepFailed(#[from] SweepError),
    #[error("{0} is not available on this server.")]
    FeatureDisabled(String),
}

impl ServerError {
    /// The engine's classification of the failure, if it came from a confirmation.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::ConfirmationFailed(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfirmationFailed(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::VerificationMismatch => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Invalid => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::StatusUpdateFailed(e) => match e {
                StatusUpdateError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                StatusUpdateError::InvalidTransition { .. } => StatusCode::CONFLICT,
                StatusUpdateError::Contended(_) | StatusUpdateError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                },
                StatusUpdateError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::SweepFailed(e) => match e {
                SweepError::InvalidThreshold(_) => StatusCode::BAD_REQUEST,
                SweepError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SweepError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::FeatureDisabled(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self.kind() {
            Some(kind) => json!({ "error": self.to_string(), "kind": kind }),
            None => json!({ "error": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).insert_header(ContentType::json()).body(body.to_string())
    }
}
