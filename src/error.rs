use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failures of the credential store's persistence layer.
///
/// A duplicate username is not an error: `register` reports it as `Ok(false)`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset not found (tried {primary} and {fallback})")]
    NotFound { primary: String, fallback: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("feature mismatch: model expects {expected:?}, got {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("{0}")]
    Prediction(String),
}

/// A prediction form value outside the range the form accepts.
#[derive(Debug, Error, PartialEq)]
#[error("{field} must be between {min} and {max}")]
pub struct InputError {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
}

/// Errors surfaced to the browser by the HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Model file not found.")]
    ModelUnavailable,

    #[error("Prediction Error: {0}")]
    Prediction(#[from] ModelError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<InputError> for AppError {
    fn from(e: InputError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "INTERNAL_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::ModelUnavailable => "MODEL_UNAVAILABLE",
            AppError::Prediction(_) => "PREDICTION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Prediction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Storage(e) => {
                error!(error = %e, "credential store failure");
                "An internal server error occurred.".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ApiErrorResponse {
            error: ApiErrorBody {
                code: self.code(),
                message,
            },
        })
    }
}
