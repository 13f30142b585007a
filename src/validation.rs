//! Request extractors that turn untyped input into validated structs.
//!
//! Deserialization failures and `validator` rule violations both surface as
//! 400 responses with the JSON error body, never as axum's plain-text
//! rejections.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::AppError;

/// JSON body that has passed its `Validate` rules.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                AppError::bad_request(format!("Ungültige Anfrage: {}", rejection.body_text()))
            })?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Query string that has passed its `Validate` rules.
#[derive(Debug)]
pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                AppError::bad_request(format!(
                    "Ungültige Suchparameter: {}",
                    rejection.body_text()
                ))
            })?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Path parameters with a JSON rejection (e.g. `/properties/abc`).
#[derive(Debug)]
pub struct IdPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for IdPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::bad_request("Ungültige ID"))?;
        Ok(Self(value))
    }
}

/// Rejects `NaN` and infinities that `f64` parsing lets through.
pub fn finite(field: &str, value: Option<f64>) -> Result<Option<f64>, AppError> {
    match value {
        Some(number) if !number.is_finite() => {
            Err(AppError::invalid_field(field, "Muss eine endliche Zahl sein"))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use validator::Validate;

    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug, Deserialize, Validate)]
    struct Sample {
        #[validate(length(min = 5, message = "Titel muss mindestens 5 Zeichen lang sein"))]
        title: String,
        #[validate(email(message = "Gültige E-Mail-Adresse erforderlich"))]
        email: String,
    }

    #[test]
    fn validation_errors_become_field_errors() {
        let sample = Sample {
            title: "Hü".into(),
            email: "kein-mail".into(),
        };
        let err = AppError::from(sample.validate().unwrap_err());
        assert_eq!(err.kind(), ErrorKind::Validation);
        let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "title"]);
        assert_eq!(
            err.field_errors()[1].message,
            "Titel muss mindestens 5 Zeichen lang sein"
        );
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert!(finite("min_price", Some(f64::NAN)).is_err());
        assert!(finite("min_price", Some(f64::INFINITY)).is_err());
        assert_eq!(finite("min_price", Some(12.5)).unwrap(), Some(12.5));
        assert_eq!(finite("min_price", None).unwrap(), None);
    }
}
