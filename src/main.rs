use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use immobilien::auth::jwt::JwtService;
use immobilien::bootstrap;
use immobilien::config::AppConfig;
use immobilien::db::Database;
use immobilien::error;
use immobilien::mail;
use immobilien::media::{MediaStore, S3MediaStore};
use immobilien::routes;
use immobilien::s3;
use immobilien::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    error::set_expose_details(!config.is_production());
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        app_env = %config.app_env,
        s3_bucket = %config.s3_bucket,
        mail_enabled = config.smtp.is_some(),
        admin_email_set = config.admin_email.is_some(),
        "loaded configuration"
    );

    let db = Database::connect(&config.database_url, config.database_max_pool_size)?;
    prepare_database(&db, &config).await?;

    let s3_client = s3::build_client(&config).await?;
    if let Err(err) = s3::check_bucket(&s3_client, &config.s3_bucket).await {
        // Search and detail still work without the bucket; uploads will fail.
        tracing::warn!(error = %format!("{err:#}"), "media bucket check failed");
    }
    let media: Arc<dyn MediaStore> = Arc::new(S3MediaStore::new(s3_client, &config));
    let mailer = mail::from_config(&config)?;
    let jwt = JwtService::from_config(&config)?;

    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST/SERVER_PORT do not form a socket address")?;
    let state = AppState::new(db, config, media, mailer, jwt);
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Applies pending migrations and creates the configured admin account.
async fn prepare_database(db: &Database, config: &AppConfig) -> anyhow::Result<()> {
    let db = db.clone();
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        db.run_migrations()?;
        let mut conn = db
            .pool()
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        bootstrap::ensure_admin(&mut conn, &config)?;
        Ok(())
    })
    .await
    .context("database preparation task panicked")?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received; draining connections");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
