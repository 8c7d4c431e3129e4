use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::BTreeMap;

/// ValidationErrors
///
/// Field-keyed collection of validation messages. Checks accumulate here
/// instead of failing fast so a caller gets every field problem in one
/// round trip.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Finish a validation pass: `Ok(())` when nothing was collected,
    /// otherwise the full field map wrapped in `ApiError::Validation`.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

/// ApiError
///
/// The complete error surface of the service. Every variant is recoverable
/// by the caller; `Internal` is the only one that hides detail (logged, not
/// returned).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credentials, or a token whose principal no longer
    /// has a role record.
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated but the policy denies the action. Deliberately carries
    /// no reason detail.
    #[error("access denied")]
    Forbidden,

    /// Referenced entity missing, or outside the caller's read scope.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Field-level input rejection.
    #[error("validation failed")]
    Validation(ValidationErrors),

    /// Live-state uniqueness violation (duplicate titles, duplicate
    /// homework instance). Distinct from validation because only the
    /// storage layer can decide it.
    #[error("{0}")]
    Conflict(&'static str),

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// Maps a storage error after an insert/update: a unique-constraint
    /// violation becomes the given conflict, anything else stays internal.
    /// This is the backstop for racing writers that both passed the
    /// pre-insert uniqueness check.
    pub fn conflict_on_unique(err: sqlx::Error, conflict: &'static str) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
                return ApiError::Conflict(conflict);
            }
        }
        err.into()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, Vec<String>>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(detail) => {
                // Full detail to the log, generic body to the caller.
                tracing::error!("internal error: {detail}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = self.to_string();
        let body = match &self {
            ApiError::Validation(v) => ErrorBody {
                error: &message,
                fields: Some(&v.fields),
            },
            _ => ErrorBody {
                error: &message,
                fields: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
