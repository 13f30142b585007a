use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::DatabaseErrorKind;
use serde::Serialize;

use crate::auth::AuthError;

pub type AppResult<T> = Result<T, AppError>;

static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

/// Controls whether dependency/internal error details are echoed to clients.
/// Only enabled outside production.
pub fn set_expose_details(enabled: bool) {
    EXPOSE_DETAILS.store(enabled, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication(AuthError),
    Authorization,
    NotFound,
    Conflict,
    Dependency,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    status: StatusCode,
    message: String,
    field_errors: Vec<FieldError>,
    detail: Option<String>,
}

impl AppError {
    fn new(kind: ErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            field_errors: Vec::new(),
            detail: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, StatusCode::BAD_REQUEST, message)
    }

    pub fn validation(field_errors: Vec<FieldError>) -> Self {
        let mut err = Self::bad_request("Validierung fehlgeschlagen");
        err.field_errors = field_errors;
        err
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(vec![FieldError {
            field: field.to_string(),
            message: message.into(),
        }])
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, StatusCode::CONFLICT, message)
    }

    /// Database or pool failure. Retryable from the caller's point of view.
    pub fn dependency<E: Display>(error: E) -> Self {
        let mut err = Self::new(
            ErrorKind::Dependency,
            StatusCode::SERVICE_UNAVAILABLE,
            "Dienst vorübergehend nicht verfügbar",
        );
        err.detail = Some(error.to_string());
        err
    }

    /// Media store or mail relay failure.
    pub fn upstream<E: Display>(error: E) -> Self {
        let mut err = Self::new(
            ErrorKind::Dependency,
            StatusCode::BAD_GATEWAY,
            "Externer Dienst nicht erreichbar",
        );
        err.detail = Some(error.to_string());
        err
    }

    pub fn internal<E: Display>(error: E) -> Self {
        let mut err = Self::new(
            ErrorKind::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Interner Serverfehler",
        );
        err.detail = Some(error.to_string());
        err
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field_errors(&self) -> &[FieldError] {
        &self.field_errors
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({detail})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self.kind, ErrorKind::Dependency | ErrorKind::Internal) {
            tracing::error!(
                status = self.status.as_u16(),
                detail = self.detail.as_deref().unwrap_or_default(),
                "request failed"
            );
        }

        let detail = if EXPOSE_DETAILS.load(Ordering::Relaxed) {
            self.detail
        } else {
            None
        };

        let body = Json(ErrorResponse {
            error: self.message,
            errors: self.field_errors,
            detail,
        });
        (self.status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        let status = match value {
            AuthError::InactiveAccount => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self::new(ErrorKind::Authentication(value), status, value.to_string())
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        use diesel::result::Error;

        match value {
            Error::NotFound => AppError::not_found("Eintrag nicht gefunden"),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::conflict("Eintrag existiert bereits")
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                AppError::bad_request("Verknüpfter Eintrag existiert nicht")
            }
            other => AppError::dependency(other),
        }
    }
}

impl From<diesel::r2d2::PoolError> for AppError {
    fn from(value: diesel::r2d2::PoolError) -> Self {
        AppError::dependency(format!("database pool error: {value}"))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(value: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = value
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                let field = field.to_string();
                errors.iter().map(move |error| FieldError {
                    field: field.clone(),
                    message: error
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| format!("Ungültiger Wert ({})", error.code)),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        AppError::validation(fields)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(format!("{value:#}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        AppError::internal(format!("background task failed: {value}"))
    }
}
