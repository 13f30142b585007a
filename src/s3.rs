//! Client for the bucket that holds listing photos and thumbnails.

use anyhow::{Context, Result};
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::AppConfig;

const FALLBACK_REGION: &str = "eu-central-1";

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let shared = load_shared_config(config).await;

    // Self-hosted endpoints (MinIO, Ceph) only understand path-style URLs,
    // which is also what `AppConfig::media_base_url` builds.
    let s3_config = S3ConfigBuilder::from(&shared)
        .force_path_style(config.aws_endpoint_url.is_some())
        .build();

    Ok(S3Client::from_conf(s3_config))
}

/// Fails when the media bucket cannot be reached with the configured
/// credentials.
pub async fn check_bucket(client: &S3Client, bucket: &str) -> Result<()> {
    client
        .head_bucket()
        .bucket(bucket)
        .send()
        .await
        .with_context(|| format!("media bucket `{bucket}` is not reachable"))?;
    Ok(())
}

async fn load_shared_config(config: &AppConfig) -> SdkConfig {
    let region = RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
        .or_default_provider()
        .or_else(FALLBACK_REGION);

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
    if let Some(endpoint) = config.aws_endpoint_url.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(credentials) = static_credentials(config) {
        loader = loader.credentials_provider(credentials);
    }
    loader.load().await
}

/// Keys from the environment win over the default provider chain, but only
/// when both halves are present.
fn static_credentials(config: &AppConfig) -> Option<Credentials> {
    let access_key = config.aws_access_key_id.clone()?;
    let secret_key = config.aws_secret_access_key.clone()?;
    Some(Credentials::new(
        access_key,
        secret_key,
        None,
        None,
        "immobilien-env",
    ))
}
