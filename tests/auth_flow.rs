mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "s3cret!";
    app.insert_user("alice", password, "admin").await?;

    let token = app.login_token("alice", password).await?;

    let response = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await?;
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["role"], "admin");
    assert!(body["user"]["last_login"].is_string());
    assert!(body["user"].get("password_hash").is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_accepts_email_and_rejects_bad_credentials() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("bert", "passwort123", "agent").await?;

    let by_email = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "bert@example.com", "password": "passwort123" }),
            None,
        )
        .await?;
    assert_eq!(by_email.status(), StatusCode::OK);

    let wrong = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "bert", "password": "falsch" }),
            None,
        )
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(wrong.into_body()).await?;
    assert_eq!(body["error"], "Ungültige Zugangsdaten");

    let unknown = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "niemand", "password": "passwort123" }),
            None,
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn inactive_accounts_cannot_log_in() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user_with_status("carla", "passwort123", "user", "suspended")
        .await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "carla", "password": "passwort123" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn protected_routes_distinguish_missing_and_bad_tokens() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let missing = app.get("/api/auth/me", None).await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(missing.into_body()).await?;
    assert_eq!(body["error"], "Keine Authentifizierung - Token fehlt");

    let garbage = app.get("/api/auth/me", Some("kein.gueltiger.token")).await?;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(garbage.into_body()).await?;
    assert_eq!(body["error"], "Ungültiger Token");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn registration_requires_admin_and_unique_email() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("chefin", "admin").await?;
    let (_, agent) = app.user_with_token("makler", "agent").await?;

    let payload = json!({
        "username": "neukunde",
        "email": "kunde@example.com",
        "password": "passwort123",
    });

    let denied = app
        .post_json("/api/auth/register", &payload, Some(&agent))
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let created = app
        .post_json("/api/auth/register", &payload, Some(&admin))
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created.into_body()).await?;
    assert_eq!(body["user"]["role"], "user");
    assert!(body["token"].is_string());

    let duplicate = app
        .post_json(
            "/api/auth/register",
            &json!({
                "username": "anderer",
                "email": "kunde@example.com",
                "password": "passwort123",
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    // chefin, makler, neukunde
    assert_eq!(app.count_rows("users").await?, 3);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn registration_reports_field_errors() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("chefin", "admin").await?;

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({ "username": "ab", "email": "keine-mail", "password": "123" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await?;
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .expect("field errors")
        .iter()
        .filter_map(|error| error["field"].as_str())
        .collect();
    assert!(fields.contains(&"username"));
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn change_password_checks_current_password() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app.user_with_token("dora", "user").await?;

    let wrong = app
        .put_json(
            "/api/auth/change-password",
            &json!({ "current_password": "falsch", "new_password": "neuespasswort" }),
            Some(&token),
        )
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let changed = app
        .put_json(
            "/api/auth/change-password",
            &json!({ "current_password": "passwort123", "new_password": "neuespasswort" }),
            Some(&token),
        )
        .await?;
    assert_eq!(changed.status(), StatusCode::OK);

    assert!(app.login_token("dora", "passwort123").await.is_err());
    app.login_token("dora", "neuespasswort").await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn health_and_unknown_routes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let health = app.get("/api/health", None).await?;
    assert_eq!(health.status(), StatusCode::OK);
    let body = body_json(health.into_body()).await?;
    assert_eq!(body["status"], "OK");

    let unknown = app.get("/api/gibt-es-nicht", None).await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    let body = body_json(unknown.into_body()).await?;
    assert_eq!(body["path"], "/api/gibt-es-nicht");

    app.cleanup().await?;
    Ok(())
}
