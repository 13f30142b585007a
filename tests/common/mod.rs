use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use immobilien::auth::jwt::JwtService;
use immobilien::auth::password::hash_password;
use immobilien::config::AppConfig;
use immobilien::db::{self, Database};
use immobilien::mail::{EmailMessage, Mailer};
use immobilien::media::{ImageUpload, MediaStore, StoredImage};
use immobilien::models::{NewProperty, NewPropertyImage, NewUser};
use immobilien::routes;
use immobilien::schema::{properties, property_images, users};
use immobilien::state::AppState;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const ADMIN_EMAIL: &str = "buero@example.com";

/// In-memory media store. Files whose name contains `fail` are rejected.
#[derive(Default)]
pub struct FakeMediaStore {
    objects: Mutex<HashMap<String, usize>>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStore for FakeMediaStore {
    async fn upload_image(&self, folder: &str, upload: ImageUpload) -> Result<StoredImage> {
        let file_name = upload.file_name.clone().unwrap_or_default();
        ensure!(!file_name.contains("fail"), "simulated upload failure for {file_name}");

        let media_id = format!("{}/{}.png", folder.trim_matches('/'), Uuid::new_v4());
        let size = upload.bytes.len();
        self.objects.lock().await.insert(media_id.clone(), size);
        Ok(StoredImage {
            url: format!("https://media.test/{media_id}"),
            thumbnail_url: Some(format!("https://media.test/{media_id}.thumb")),
            media_id,
            width: None,
            height: None,
            format: "png".to_string(),
            size,
        })
    }

    async fn delete_image(&self, media_id: &str) -> Result<()> {
        self.objects.lock().await.remove(media_id);
        self.deleted.lock().await.push(media_id.to_string());
        Ok(())
    }
}

impl FakeMediaStore {
    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    #[allow(dead_code)]
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

/// Captures outgoing mail instead of talking to a relay.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

impl RecordingMailer {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    /// Detached notifications finish after the response; poll until `count`
    /// messages arrived or give up after two seconds.
    #[allow(dead_code)]
    pub async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..40 {
            let sent = self.sent().await;
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.sent().await
    }
}

/// Listing row used to seed the database directly.
#[derive(Clone)]
pub struct PropertySeed {
    pub title: String,
    pub property_type: &'static str,
    pub offer_type: &'static str,
    pub price: f64,
    pub size: f64,
    pub rooms: i32,
    pub city: Option<String>,
    pub status: &'static str,
    pub featured: bool,
    pub features: &'static str,
    pub user_id: Option<i32>,
    pub age_days: Option<i64>,
}

impl PropertySeed {
    pub fn new(title: &str, price: f64, city: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            property_type: "apartment",
            offer_type: "rent",
            price,
            size: 80.0,
            rooms: 3,
            city: city.map(str::to_string),
            status: "available",
            featured: false,
            features: "[]",
            user_id: None,
            age_days: None,
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    media: Arc<FakeMediaStore>,
    mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            app_env: "test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_hours: 1,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "eu-central-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            media_public_base_url: Some("https://media.test".to_string()),
            max_file_size: 64 * 1024,
            allowed_file_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            smtp: None,
            email_from: "Immobilien Test <noreply@example.com>".to_string(),
            admin_email: Some(ADMIN_EMAIL.to_string()),
            site_name: "Immobilien Test".to_string(),
            site_url: None,
            admin_username: "admin".to_string(),
            admin_password: None,
        };

        let db = Database::connect(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&db).await?;

        let media = Arc::new(FakeMediaStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let media_for_state: Arc<dyn MediaStore> = media.clone();
        let mailer_for_state: Arc<dyn Mailer> = mailer.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(db, config, media_for_state, mailer_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            media,
            mailer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    #[allow(dead_code)]
    pub fn media(&self) -> Arc<FakeMediaStore> {
        self.media.clone()
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<RecordingMailer> {
        self.mailer.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, role: &str) -> Result<i32> {
        self.insert_user_with_status(username, password, role, "active")
            .await
    }

    pub async fn insert_user_with_status(
        &self,
        username: &str,
        password: &str,
        role: &str,
        status: &str,
    ) -> Result<i32> {
        let user = NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: hash_password(password)?,
            full_name: Some(format!("{username} Test")),
            role: role.to_string(),
            status: status.to_string(),
            phone: None,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(users::table)
                .values(&user)
                .returning(users::id)
                .get_result(conn)
                .context("failed to insert user")
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_json(response.into_body()).await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response carries no token"))
    }

    /// Creates a user with `role` and returns its id and a bearer token.
    #[allow(dead_code)]
    pub async fn user_with_token(&self, username: &str, role: &str) -> Result<(i32, String)> {
        let id = self.insert_user(username, "passwort123", role).await?;
        let token = self.login_token(username, "passwort123").await?;
        Ok((id, token))
    }

    #[allow(dead_code)]
    pub async fn insert_property(&self, seed: PropertySeed) -> Result<i32> {
        self.with_conn(move |conn| {
            let row = NewProperty {
                title: seed.title.clone(),
                property_type: seed.property_type.to_string(),
                offer_type: seed.offer_type.to_string(),
                price: seed.price,
                size: seed.size,
                rooms: seed.rooms,
                bathrooms: 1,
                year_built: None,
                location: seed.city.clone().unwrap_or_else(|| "Unbekannt".to_string()),
                address: None,
                zip_code: None,
                city: seed.city.clone(),
                state: None,
                latitude: None,
                longitude: None,
                description: format!("Beschreibung für {}", seed.title),
                features: seed.features.to_string(),
                status: seed.status.to_string(),
                featured: seed.featured,
                user_id: seed.user_id,
                published_at: None,
            };
            let id: i32 = diesel::insert_into(properties::table)
                .values(&row)
                .returning(properties::id)
                .get_result(conn)
                .context("failed to insert property")?;

            if let Some(days) = seed.age_days {
                let created_at = Utc::now() - chrono::Duration::days(days);
                diesel::update(properties::table.find(id))
                    .set(properties::created_at.eq(created_at))
                    .execute(conn)
                    .context("failed to backdate property")?;
            }
            Ok(id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_image(
        &self,
        property_id: i32,
        display_order: i32,
        is_primary: bool,
    ) -> Result<i32> {
        self.with_conn(move |conn| {
            let row = NewPropertyImage {
                property_id,
                image_url: format!("https://media.test/properties/{property_id}/{display_order}.jpg"),
                thumbnail_url: None,
                media_id: Some(format!("properties/{property_id}/{display_order}.jpg")),
                title: None,
                is_primary,
                display_order,
            };
            diesel::insert_into(property_images::table)
                .values(&row)
                .returning(property_images::id)
                .get_result(conn)
                .context("failed to insert image")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn count_rows(&self, table: &'static str) -> Result<i64> {
        #[derive(QueryableByName)]
        struct Count {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            count: i64,
        }

        self.with_conn(move |conn| {
            let row: Count = diesel::sql_query(format!("SELECT COUNT(*) AS count FROM {table}"))
                .get_result(conn)
                .with_context(|| format!("failed to count {table}"))?;
            Ok(row.count)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path, token).await
    }

    #[allow(dead_code)]
    pub async fn put(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::PUT, path, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path, token).await
    }

    async fn send_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.send(request).await
    }

    /// Posts a multipart form. Text parts are `(name, value)`; files are
    /// `(field, filename, content_type, bytes)`.
    #[allow(dead_code)]
    pub async fn upload_multipart(
        &self,
        path: &str,
        texts: &[(&str, &str)],
        files: &[(&str, &str, &str, &[u8])],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        for (name, value) in texts {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }
        for (field, filename, content_type, data) in files {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(*data);
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.db.pool().clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(body: Body) -> Result<Value> {
    let bytes = body_to_vec(body).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(db: &Database) -> Result<()> {
    let pool = db.pool().clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE favorites, property_images, inquiries, properties, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
