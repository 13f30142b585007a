use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    auth::{password, policy, AuthError, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewUser, Role, User, UserStatus},
    schema::users,
    state::AppState,
    utils::json::non_blank,
    validation::ValidJson,
};

use super::users::{duplicate_account, ensure_account_free, validate_username, UserProfile};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, message = "Benutzername muss mindestens 3 Zeichen lang sein"),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(email(message = "Gültige E-Mail-Adresse erforderlich"))]
    pub email: String,
    #[validate(length(min = 6, message = "Passwort muss mindestens 6 Zeichen lang sein"))]
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

/// Creates a plain `user` account. Only admins may register new accounts.
pub async fn register(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    ValidJson(payload): ValidJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    policy::authorize(&actor, policy::Action::Create, policy::Resource::UserDirectory)?;

    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    let full_name = non_blank(payload.full_name);
    let phone = non_blank(payload.phone);
    let password = payload.password;

    let user = state
        .db
        .run(move |conn| {
            ensure_account_free(conn, &username, &email)?;
            let new_user = NewUser {
                username,
                email,
                password_hash: password::hash_password(&password)?,
                full_name,
                role: Role::User.as_str().to_string(),
                status: UserStatus::Active.as_str().to_string(),
                phone,
            };
            diesel::insert_into(users::table)
                .values(&new_user)
                .get_result::<User>(conn)
                .map_err(|err| duplicate_account(err.into()))
        })
        .await?;

    let token = state.jwt.generate_token(user.id, &user.username, Role::User)?;
    tracing::info!(user_id = user.id, registered_by = actor.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Benutzer erfolgreich registriert",
            "token": token,
            "user": UserProfile::from(user),
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username or e-mail address.
    #[validate(length(min = 1, message = "Benutzername ist erforderlich"))]
    pub username: String,
    #[validate(length(min = 1, message = "Passwort ist erforderlich"))]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> AppResult<Json<Value>> {
    let identifier = payload.username.trim().to_string();
    let password_attempt = payload.password;

    let user = state
        .db
        .run(move |conn| {
            let user = users::table
                .filter(
                    users::username
                        .eq(&identifier)
                        .or(users::email.eq(identifier.to_lowercase())),
                )
                .first::<User>(conn)
                .optional()?
                .ok_or(AuthError::InvalidCredentials)?;

            if !password::verify_password(&password_attempt, &user.password_hash)? {
                return Err(AuthError::InvalidCredentials.into());
            }
            if user.status.parse::<UserStatus>() != Ok(UserStatus::Active) {
                return Err(AuthError::InactiveAccount.into());
            }

            let now = Utc::now();
            diesel::update(users::table.find(user.id))
                .set(users::last_login.eq(now))
                .execute(conn)?;
            Ok(User {
                last_login: Some(now),
                ..user
            })
        })
        .await?;

    let role = user.role.parse::<Role>().map_err(AppError::internal)?;
    let token = state.jwt.generate_token(user.id, &user.username, role)?;
    tracing::info!(user_id = user.id, "login succeeded");

    Ok(Json(json!({
        "message": "Anmeldung erfolgreich",
        "token": token,
        "user": UserProfile::from(user),
    })))
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let user_id = user.id;
    let row = state
        .db
        .run(move |conn| Ok(users::table.find(user_id).first::<User>(conn)?))
        .await?;

    Ok(Json(json!({
        "user": {
            "id": row.id,
            "username": row.username,
            "email": row.email,
            "full_name": row.full_name,
            "role": row.role,
            "phone": row.phone,
            "avatar_url": row.avatar_url,
            "last_login": row.last_login,
            "created_at": row.created_at,
        }
    })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Aktuelles Passwort ist erforderlich"))]
    pub current_password: String,
    #[validate(length(min = 6, message = "Neues Passwort muss mindestens 6 Zeichen lang sein"))]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidJson(payload): ValidJson<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    if payload.current_password == payload.new_password {
        return Err(AppError::invalid_field(
            "new_password",
            "Neues Passwort muss sich vom aktuellen unterscheiden",
        ));
    }

    let user_id = user.id;
    state
        .db
        .run(move |conn| {
            let current_hash: String = users::table
                .find(user_id)
                .select(users::password_hash)
                .first(conn)?;
            if !password::verify_password(&payload.current_password, &current_hash)? {
                return Err(AppError::from(AuthError::InvalidCredentials)
                    .with_message("Aktuelles Passwort ist falsch"));
            }

            let new_hash = password::hash_password(&payload.new_password)?;
            diesel::update(users::table.find(user_id))
                .set((
                    users::password_hash.eq(new_hash),
                    users::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await?;

    tracing::info!(user_id, "password changed");
    Ok(Json(json!({ "message": "Passwort erfolgreich geändert" })))
}

/// Tokens are stateless; the client discards its copy.
pub async fn logout(user: AuthenticatedUser) -> Json<Value> {
    tracing::debug!(user_id = user.id, "logout");
    Json(json!({ "message": "Erfolgreich abgemeldet" }))
}
