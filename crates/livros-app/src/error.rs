use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use tracing::{debug, error};

use crate::catalog::CatalogError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Missing record identifier")]
    MissingIdentifier,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("Database error: {0}")]
    DatabaseError(#[from] livros_dal::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::MissingIdentifier => ApiError::MissingIdentifier,
            CatalogError::RecordNotFound(what) => ApiError::NotFound(what),
            // form handlers render the submission back, this is for anything else
            CatalogError::ValidationFailed { errors, .. } => ApiError::InvalidQuery(format!(
                "Invalid fields: {}",
                errors.fields().collect::<Vec<_>>().join(", ")
            )),
            CatalogError::PersistenceFailure(e) => ApiError::DatabaseError(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::MissingIdentifier => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Missing record identifier" }),
            ),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{what} not found") }),
            ),
            ApiError::Forbidden(reason) => {
                debug!("Request rejected: {reason}");
                (StatusCode::FORBIDDEN, json!({ "error": reason }))
            }
            ApiError::DatabaseError(e) => {
                error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
