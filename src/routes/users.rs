use std::borrow::Cow;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Duration, Utc};
use diesel::{dsl::count_star, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::{Validate, ValidationError};

use crate::auth::policy::{authorize, Action, Resource};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::listings::filter::escape_like;
use crate::mail::templates::{self, Branding};
use crate::models::{NewUser, Role, User, UserStatus};
use crate::schema::{properties, users};
use crate::state::AppState;
use crate::tasks;
use crate::utils::json::{non_blank, nullable};
use crate::utils::pagination::{self, PagePagination};
use crate::validation::{IdPath, ValidJson, ValidQuery};

pub const DUPLICATE_ACCOUNT: &str = "Benutzername oder E-Mail bereits vergeben";
const USER_NOT_FOUND: &str = "Benutzer nicht gefunden";
const RECENT_REGISTRATION_DAYS: i64 = 7;

/// Account as returned to clients; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub status: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            status: user.status,
            phone: user.phone,
            avatar_url: user.avatar_url,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

pub fn validate_username(value: &str) -> Result<(), ValidationError> {
    let allowed = value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if allowed {
        Ok(())
    } else {
        Err(ValidationError::new("username").with_message(Cow::Borrowed(
            "Benutzername darf nur Buchstaben, Zahlen, _, - und . enthalten",
        )))
    }
}

/// Rewrites storage-level unique violations into the account-specific message.
pub fn duplicate_account(err: AppError) -> AppError {
    if err.kind() == ErrorKind::Conflict {
        err.with_message(DUPLICATE_ACCOUNT)
    } else {
        err
    }
}

/// Fails with 409 when the username or e-mail is already taken.
pub fn ensure_account_free(conn: &mut PgConnection, username: &str, email: &str) -> AppResult<()> {
    let taken = diesel::select(diesel::dsl::exists(
        users::table.filter(users::username.eq(username).or(users::email.eq(email))),
    ))
    .get_result::<bool>(conn)?;
    if taken {
        return Err(AppError::conflict(DUPLICATE_ACCOUNT));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub search: Option<String>,
    #[validate(range(min = 1, message = "Seite muss mindestens 1 sein"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "Limit muss zwischen 1 und 100 liegen"))]
    pub limit: Option<i64>,
}

fn filtered_users(query: &UserListQuery) -> users::BoxedQuery<'static, Pg> {
    let mut statement = users::table.into_boxed();
    if let Some(role) = query.role {
        statement = statement.filter(users::role.eq(role.as_str()));
    }
    if let Some(status) = query.status {
        statement = statement.filter(users::status.eq(status.as_str()));
    }
    if let Some(search) = non_blank(query.search.clone()) {
        let pattern = format!("%{}%", escape_like(&search));
        statement = statement.filter(
            users::username
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern.clone()))
                .or(users::full_name.ilike(pattern)),
        );
    }
    statement
}

pub async fn list_users(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    ValidQuery(query): ValidQuery<UserListQuery>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Read, Resource::UserDirectory)?;
    let (page, limit, offset) = pagination::resolve(query.page, query.limit)?;

    let (total, rows) = state
        .db
        .run(move |conn| {
            let total: i64 = filtered_users(&query).count().get_result(conn)?;
            let rows: Vec<User> = filtered_users(&query)
                .order((users::created_at.desc(), users::id.desc()))
                .limit(limit)
                .offset(offset)
                .load(conn)?;
            Ok((total, rows))
        })
        .await?;

    let users: Vec<UserProfile> = rows.into_iter().map(UserProfile::from).collect();
    Ok(Json(json!({
        "users": users,
        "pagination": PagePagination::new(total, page, limit),
    })))
}

pub async fn get_user(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(user_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Read, Resource::UserAccount { id: user_id })?;

    let (user, property_count) = state
        .db
        .run(move |conn| {
            let user = users::table
                .find(user_id)
                .first::<User>(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
            let property_count: i64 = properties::table
                .filter(properties::user_id.eq(user_id))
                .select(count_star())
                .first(conn)?;
            Ok((user, property_count))
        })
        .await?;

    let mut body = serde_json::to_value(UserProfile::from(user))?;
    body["property_count"] = json!(property_count);
    Ok(Json(json!({ "user": body })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
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
    pub role: Option<Role>,
}

pub async fn create_user(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    ValidJson(payload): ValidJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    authorize(&actor, Action::Create, Resource::UserDirectory)?;

    let role = payload.role.unwrap_or(Role::User);
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
                role: role.as_str().to_string(),
                status: UserStatus::Active.as_str().to_string(),
                phone,
            };
            diesel::insert_into(users::table)
                .values(&new_user)
                .get_result::<User>(conn)
                .map_err(|err| duplicate_account(err.into()))
        })
        .await?;

    tracing::info!(user_id = user.id, role = %role, created_by = actor.id, "user created");

    let message = templates::welcome(
        &Branding::from_config(&state.config),
        &user.email,
        &user.username,
        user.full_name.as_deref(),
    );
    let mailer = state.mailer.clone();
    tasks::detach("welcome_email", async move { mailer.send(message).await });

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Benutzer erfolgreich erstellt",
            "user": UserProfile::from(user),
        })),
    ))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[validate(email(message = "Gültige E-Mail-Adresse erforderlich"))]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub full_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar_url: Option<Option<String>>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

impl UpdateUserRequest {
    fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.full_name.is_none()
            && self.phone.is_none()
            && self.avatar_url.is_none()
            && self.role.is_none()
            && self.status.is_none()
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChangeset {
    email: Option<String>,
    full_name: Option<Option<String>>,
    phone: Option<Option<String>>,
    avatar_url: Option<Option<String>>,
    role: Option<String>,
    status: Option<String>,
    updated_at: DateTime<Utc>,
}

pub async fn update_user(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(user_id): IdPath<i32>,
    ValidJson(payload): ValidJson<UpdateUserRequest>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Update, Resource::UserAccount { id: user_id })?;
    if payload.role.is_some() || payload.status.is_some() {
        authorize(&actor, Action::Administer, Resource::UserAccount { id: user_id })?;
    }
    if payload.is_empty() {
        return Err(AppError::bad_request("Keine gültigen Felder zum Aktualisieren"));
    }

    let changeset = UserChangeset {
        email: payload.email.map(|email| email.trim().to_lowercase()),
        full_name: payload.full_name.map(non_blank),
        phone: payload.phone.map(non_blank),
        avatar_url: payload.avatar_url.map(non_blank),
        role: payload.role.map(|role| role.as_str().to_string()),
        status: payload.status.map(|status| status.as_str().to_string()),
        updated_at: Utc::now(),
    };

    let user = state
        .db
        .transaction(move |conn| {
            users::table
                .find(user_id)
                .select(users::id)
                .first::<i32>(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;

            if let Some(email) = changeset.email.as_deref() {
                let taken = diesel::select(diesel::dsl::exists(
                    users::table
                        .filter(users::email.eq(email))
                        .filter(users::id.ne(user_id)),
                ))
                .get_result::<bool>(conn)?;
                if taken {
                    return Err(AppError::conflict("E-Mail bereits vergeben"));
                }
            }

            diesel::update(users::table.find(user_id))
                .set(&changeset)
                .get_result::<User>(conn)
                .map_err(|err| {
                    let err = AppError::from(err);
                    if err.kind() == ErrorKind::Conflict {
                        err.with_message("E-Mail bereits vergeben")
                    } else {
                        err
                    }
                })
        })
        .await?;

    Ok(Json(json!({
        "message": "Benutzer erfolgreich aktualisiert",
        "user": UserProfile::from(user),
    })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(user_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Delete, Resource::UserAccount { id: user_id })?;
    if actor.id == user_id {
        return Err(AppError::bad_request(
            "Sie können Ihr eigenes Konto nicht löschen",
        ));
    }

    let deleted = state
        .db
        .run(move |conn| Ok(diesel::delete(users::table.find(user_id)).execute(conn)?))
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found(USER_NOT_FOUND));
    }

    tracing::info!(user_id, deleted_by = actor.id, "user deleted");
    Ok(Json(json!({ "message": "Benutzer erfolgreich gelöscht" })))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub admin: i64,
    pub manager: i64,
    pub agent: i64,
    pub user: i64,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub suspended: i64,
    pub by_role: RoleCounts,
    pub recent_registrations: i64,
}

impl UserStats {
    fn from_counts(
        by_status: &[(String, i64)],
        by_role: &[(String, i64)],
        recent_registrations: i64,
    ) -> Self {
        let mut stats = UserStats {
            recent_registrations,
            ..Default::default()
        };
        for (status, count) in by_status {
            stats.total += count;
            match status.parse::<UserStatus>() {
                Ok(UserStatus::Active) => stats.active += count,
                Ok(UserStatus::Inactive) => stats.inactive += count,
                Ok(UserStatus::Suspended) => stats.suspended += count,
                Err(_) => {}
            }
        }
        for (role, count) in by_role {
            match role.parse::<Role>() {
                Ok(Role::Admin) => stats.by_role.admin += count,
                Ok(Role::Manager) => stats.by_role.manager += count,
                Ok(Role::Agent) => stats.by_role.agent += count,
                Ok(Role::User) => stats.by_role.user += count,
                Err(_) => {}
            }
        }
        stats
    }
}

pub async fn user_stats(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Read, Resource::UserDirectory)?;
    let since = Utc::now() - Duration::days(RECENT_REGISTRATION_DAYS);

    let stats = state
        .db
        .transaction(move |conn| {
            let by_status: Vec<(String, i64)> = users::table
                .group_by(users::status)
                .select((users::status, count_star()))
                .load(conn)?;
            let by_role: Vec<(String, i64)> = users::table
                .group_by(users::role)
                .select((users::role, count_star()))
                .load(conn)?;
            let recent: i64 = users::table
                .filter(users::created_at.ge(since))
                .select(count_star())
                .first(conn)?;
            Ok(UserStats::from_counts(&by_status, &by_role, recent))
        })
        .await?;

    Ok(Json(json!({ "stats": stats })))
}
