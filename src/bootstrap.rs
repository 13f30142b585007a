use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::auth::password::hash_password;
use crate::config::AppConfig;
use crate::models::{NewUser, Role, UserStatus};
use crate::schema::users;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminBootstrap {
    Created(i32),
    AlreadyPresent,
    /// `ADMIN_PASSWORD` is unset.
    Skipped,
}

/// Creates the configured admin account unless a user with that username
/// already exists. Existing accounts are never modified.
pub fn ensure_admin(conn: &mut PgConnection, config: &AppConfig) -> Result<AdminBootstrap> {
    let Some(password) = config.admin_password.as_deref() else {
        tracing::info!(
            username = %config.admin_username,
            "ADMIN_PASSWORD not set; skipping admin bootstrap"
        );
        return Ok(AdminBootstrap::Skipped);
    };

    let existing = users::table
        .filter(users::username.eq(&config.admin_username))
        .select(users::id)
        .first::<i32>(conn)
        .optional()
        .context("failed to look up admin account")?;
    if let Some(id) = existing {
        tracing::debug!(user_id = id, "admin account already present");
        return Ok(AdminBootstrap::AlreadyPresent);
    }

    let admin = NewUser {
        username: config.admin_username.clone(),
        email: admin_email(config),
        password_hash: hash_password(password)?,
        full_name: Some("Administrator".to_string()),
        role: Role::Admin.as_str().to_string(),
        status: UserStatus::Active.as_str().to_string(),
        phone: None,
    };
    let id = diesel::insert_into(users::table)
        .values(&admin)
        .returning(users::id)
        .get_result::<i32>(conn)
        .context("failed to create admin account")?;

    tracing::info!(user_id = id, username = %admin.username, "created admin account");
    Ok(AdminBootstrap::Created(id))
}

fn admin_email(config: &AppConfig) -> String {
    config
        .admin_email
        .clone()
        .filter(|email| !email.trim().is_empty())
        .unwrap_or_else(|| format!("{}@localhost", config.admin_username))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(admin_email: Option<&str>) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/immobilien_test".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            app_env: "test".into(),
            jwt_secret: "secret".into(),
            jwt_issuer: "immobilien".into(),
            jwt_audience: "immobilien-clients".into(),
            jwt_expiry_hours: 1,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "eu-central-1".into(),
            s3_bucket: "immobilien".into(),
            media_public_base_url: None,
            max_file_size: 1024,
            allowed_file_types: vec!["image/png".into()],
            smtp: None,
            email_from: "noreply@example.com".into(),
            admin_email: admin_email.map(str::to_string),
            site_name: "Immobilien".into(),
            site_url: None,
            admin_username: "chef".into(),
            admin_password: Some("geheim123".into()),
        }
    }

    #[test]
    fn admin_email_falls_back_to_username() {
        assert_eq!(admin_email(&config(Some("chef@example.com"))), "chef@example.com");
        assert_eq!(admin_email(&config(None)), "chef@localhost");
        assert_eq!(admin_email(&config(Some("  "))), "chef@localhost");
    }
}
