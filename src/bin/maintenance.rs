use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use immobilien::{
    auth::password::hash_password,
    bootstrap::{self, AdminBootstrap},
    config::AppConfig,
    db,
    media::thumbnail_key,
    s3,
    schema::property_images,
};

const USAGE: &str =
    "Usage: maintenance ensure-admin | hash-password <password> | purge-orphan-media";

const LISTING_MEDIA_PREFIX: &str = "properties/";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("ensure-admin") => ensure_admin().await?,
        Some("hash-password") => match args.next() {
            Some(password) => println!("{}", hash_password(&password)?),
            None => {
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
        },
        Some("purge-orphan-media") => purge_orphan_media().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );
    Ok(config)
}

async fn ensure_admin() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;

    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
        bootstrap::ensure_admin(&mut conn, &config)
    })
    .await
    .context("admin bootstrap task panicked")??;

    match outcome {
        AdminBootstrap::Created(id) => println!("Admin account created (id {id})."),
        AdminBootstrap::AlreadyPresent => println!("Admin account already present."),
        AdminBootstrap::Skipped => println!("ADMIN_PASSWORD not set; nothing to do."),
    }
    Ok(())
}

/// Deletes listing photos in the bucket that no image row points at, e.g.
/// leftovers of uploads whose database insert failed.
async fn purge_orphan_media() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let client = s3::build_client(&config).await?;
    s3::check_bucket(&client, &config.s3_bucket).await?;

    let media_ids: Vec<String> = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
        property_images::table
            .filter(property_images::media_id.is_not_null())
            .select(property_images::media_id.assume_not_null())
            .load(&mut conn)
            .context("failed to load image media ids")
    })
    .await
    .context("media id task panicked")??;

    let mut referenced: HashSet<String> = HashSet::with_capacity(media_ids.len() * 2);
    for media_id in media_ids {
        referenced.insert(thumbnail_key(&media_id));
        referenced.insert(media_id);
    }

    let mut orphans = Vec::new();
    let mut continuation: Option<String> = None;
    loop {
        let page = client
            .list_objects_v2()
            .bucket(&config.s3_bucket)
            .prefix(LISTING_MEDIA_PREFIX)
            .set_continuation_token(continuation.take())
            .send()
            .await
            .context("failed to list stored media")?;

        orphans.extend(
            page.contents()
                .iter()
                .filter_map(|object| object.key())
                .filter(|key| !referenced.contains(*key))
                .map(str::to_string),
        );

        match page.next_continuation_token() {
            Some(token) if page.is_truncated().unwrap_or(false) => {
                continuation = Some(token.to_string())
            }
            _ => break,
        }
    }

    if orphans.is_empty() {
        println!("No orphaned media found.");
        return Ok(());
    }

    println!("Deleting {} orphaned objects…", orphans.len());
    for key in &orphans {
        if let Err(err) = client
            .delete_object()
            .bucket(&config.s3_bucket)
            .key(key)
            .send()
            .await
        {
            eprintln!("Failed to delete object {key} from storage: {err}");
        }
    }

    println!("Orphaned media removed.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
