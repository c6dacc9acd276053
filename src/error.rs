use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use derive_more::Display;

/// Error taxonomy for the attendance API. Every variant maps to a stable
/// HTTP status and is rendered inside the `{success, message}` envelope.
#[derive(Debug, Display)]
pub enum AppError {
    /// Malformed input (bad coordinates, missing/oversized photo) -> 422.
    #[display(fmt = "{}", _0)]
    Validation(String),
    /// Unknown staff/residence/record -> 404.
    #[display(fmt = "{}", _0)]
    NotFound(String),
    /// Inactive staff, assignment not permitted, unknown tenant -> 403.
    #[display(fmt = "{}", _0)]
    Authorization(String),
    /// Business rule violation (already clocked in, no schedule, on leave,
    /// exit before entry, exit window exceeded) -> 400.
    #[display(fmt = "{}", _0)]
    Conflict(String),
    /// Store or blob unavailable -> 500. Details stay in the logs.
    #[display(fmt = "Error interno del servidor")]
    Infrastructure,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "message": self.to_string(),
        }))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "database error");
        AppError::Infrastructure
    }
}

/// MySQL signals a violated unique key with SQLSTATE 23000.
pub fn is_duplicate_key(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23000"))
}
