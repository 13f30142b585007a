use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_MAX_FILE_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_ALLOWED_FILE_TYPES: &str = "image/jpeg,image/jpg,image/png,image/webp";
pub const DEFAULT_EMAIL_FROM: &str = "Immobilien Ghumman <noreply@immobilien-ghumman.de>";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub app_env: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_hours: i64,
    pub cors_allowed_origin: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: String,
    pub media_public_base_url: Option<String>,
    pub max_file_size: usize,
    pub allowed_file_types: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub email_from: String,
    pub admin_email: Option<String>,
    pub site_name: String,
    pub site_url: Option<String>,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: SmtpTls,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtpTls {
    StartTls,
    Tls,
    None,
}

impl FromStr for SmtpTls {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" | "true" => Ok(Self::Tls),
            "none" | "off" | "false" => Ok(Self::None),
            other => Err(anyhow!("unknown SMTP_TLS mode `{other}`")),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = parse_var("SERVER_PORT", 3000u16).context("SERVER_PORT must be a valid u16")?;
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "immobilien".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "immobilien-clients".to_string());
        let jwt_expiry_hours =
            parse_var("JWT_EXPIRY_HOURS", 168i64).context("JWT_EXPIRY_HOURS must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "eu-central-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
        let media_public_base_url = env::var("MEDIA_PUBLIC_BASE_URL").ok();
        let max_file_size = parse_var("MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)
            .context("MAX_FILE_SIZE must be a byte count")?;
        let allowed_file_types = parse_allowed_types(
            &env::var("ALLOWED_FILE_TYPES").unwrap_or_else(|_| DEFAULT_ALLOWED_FILE_TYPES.into()),
        );

        let smtp = match env::var("SMTP_HOST").ok().filter(|host| !host.trim().is_empty()) {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_var("SMTP_PORT", 587u16).context("SMTP_PORT must be a valid u16")?,
                username: env::var("SMTP_USERNAME").ok(),
                password: env::var("SMTP_PASSWORD").ok(),
                tls: env::var("SMTP_TLS")
                    .ok()
                    .map(|value| value.parse())
                    .transpose()?
                    .unwrap_or(SmtpTls::StartTls),
            }),
            None => None,
        };
        let email_from = env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_EMAIL_FROM.to_string());
        let admin_email = env::var("ADMIN_EMAIL").ok();
        let site_name = env::var("SITE_NAME").unwrap_or_else(|_| "Immobilien Ghumman".to_string());
        let site_url = env::var("SITE_URL").ok();
        let admin_username = env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
        let admin_password = env::var("ADMIN_PASSWORD").ok().filter(|pw| !pw.is_empty());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            app_env,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_hours,
            cors_allowed_origin,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            media_public_base_url,
            max_file_size,
            allowed_file_types,
            smtp,
            email_from,
            admin_email,
            site_name,
            site_url,
            admin_username,
            admin_password,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Base URL under which uploaded media objects are publicly reachable.
    pub fn media_base_url(&self) -> String {
        if let Some(base) = &self.media_public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        match &self.aws_endpoint_url {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.s3_bucket),
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                self.s3_bucket, self.aws_region
            ),
        }
    }

    pub fn is_allowed_file_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_file_types
            .iter()
            .any(|allowed| *allowed == content_type)
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.trim().parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_allowed_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
