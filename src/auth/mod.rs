pub mod jwt;
pub mod password;
pub mod policy;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    models::{Role, User, UserStatus},
    schema::users,
    state::AppState,
};

pub const FORBIDDEN_MESSAGE: &str = "Keine Berechtigung für diese Aktion";

/// Why a credential was rejected. Each variant maps to its own client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Keine Authentifizierung - Token fehlt")]
    MissingToken,
    #[error("Ungültiger Token")]
    MalformedToken,
    #[error("Token abgelaufen")]
    ExpiredToken,
    #[error("Benutzer nicht gefunden")]
    UnknownUser,
    #[error("Konto ist nicht aktiv")]
    InactiveAccount,
    #[error("Ungültige Zugangsdaten")]
    InvalidCredentials,
}

/// Identity resolved from a bearer token against the current user row.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, roles: &[Role]) -> AppResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden(FORBIDDEN_MESSAGE))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
        {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_owned(),
            Err(rejection) if rejection.is_missing() => return Err(AuthError::MissingToken.into()),
            Err(_) => return Err(AuthError::MalformedToken.into()),
        };

        let claims = state.jwt.verify_token(&token)?;
        let user_id = claims.sub;

        let user = state
            .db
            .run(move |conn| {
                Ok(users::table
                    .find(user_id)
                    .first::<User>(conn)
                    .optional()?)
            })
            .await?
            .ok_or(AuthError::UnknownUser)?;

        resolve_identity(user)
    }
}

fn resolve_identity(user: User) -> AppResult<AuthenticatedUser> {
    let status = user.status.parse::<UserStatus>();
    if status != Ok(UserStatus::Active) {
        return Err(AuthError::InactiveAccount.into());
    }
    let role = user.role.parse::<Role>().map_err(AppError::internal)?;
    Ok(AuthenticatedUser {
        id: user.id,
        username: user.username,
        email: user.email,
        role,
        status: UserStatus::Active,
    })
}

/// Optional variant of [`AuthenticatedUser`]: never rejects.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match AuthenticatedUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(err) => {
                tracing::debug!(error = %err, "continuing anonymously");
                Ok(MaybeUser(None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::error::ErrorKind;

    fn user(status: &str, role: &str) -> User {
        User {
            id: 3,
            username: "maria".into(),
            email: "maria@example.com".into(),
            password_hash: String::new(),
            full_name: None,
            role: role.into(),
            status: status.into(),
            phone: None,
            avatar_url: None,
            last_login: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn active_user_resolves() {
        let identity = resolve_identity(user("active", "manager")).unwrap();
        assert_eq!(identity.role, Role::Manager);
        assert_eq!(identity.status, UserStatus::Active);
        assert!(identity.require_role(Role::STAFF).is_ok());
    }

    #[test]
    fn suspended_and_inactive_users_are_rejected() {
        for status in ["suspended", "inactive"] {
            let err = resolve_identity(user(status, "admin")).unwrap_err();
            assert_eq!(
                err.kind(),
                ErrorKind::Authentication(AuthError::InactiveAccount)
            );
        }
    }

    #[test]
    fn role_check_rejects_outsiders() {
        let identity = resolve_identity(user("active", "user")).unwrap();
        let err = identity.require_role(&[Role::Admin]).unwrap_err();
        assert_eq!(err.message(), FORBIDDEN_MESSAGE);
    }
}
