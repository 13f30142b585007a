//! Image storage for listing photos.
//!
//! Handlers only enforce upload limits and persist what the store returns;
//! where the bytes live and how thumbnails are produced is the store's
//! business.

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use serde::Serialize;
use uuid::Uuid;

use crate::config::AppConfig;

pub const THUMBNAIL_WIDTH: u32 = 400;
pub const THUMBNAIL_HEIGHT: u32 = 300;

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub media_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: String,
    pub size: usize,
}

#[async_trait]
pub trait MediaStore: Send + Sync + 'static {
    /// Stores the image (and a thumbnail where possible) under `folder`.
    async fn upload_image(&self, folder: &str, upload: ImageUpload) -> Result<StoredImage>;

    /// Removes the image and its thumbnail.
    async fn delete_image(&self, media_id: &str) -> Result<()>;
}

pub struct S3MediaStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3MediaStore {
    pub fn new(client: S3Client, config: &AppConfig) -> Self {
        Self {
            client,
            bucket: config.s3_bucket.clone(),
            public_base_url: config.media_base_url(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .cache_control("public, max-age=31536000, immutable")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("failed to upload {key} to S3"))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete {key} from S3"))?;
        Ok(())
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn upload_image(&self, folder: &str, upload: ImageUpload) -> Result<StoredImage> {
        let format = image_format_name(&upload.content_type);
        let key = media_key(folder, &upload.content_type);
        let size = upload.bytes.len();

        let source = upload.bytes.clone();
        let rendered = tokio::task::spawn_blocking(move || render_thumbnail(&source))
            .await
            .map_err(|err| anyhow!("thumbnail task failed: {err}"))??;

        self.put_object(&key, upload.bytes.to_vec(), &upload.content_type)
            .await?;

        let thumb_key = thumbnail_key(&key);
        let thumbnail_url = match self
            .put_object(&thumb_key, rendered.thumbnail, "image/jpeg")
            .await
        {
            Ok(()) => Some(self.public_url(&thumb_key)),
            Err(err) => {
                tracing::warn!(key = %thumb_key, error = %format!("{err:#}"), "thumbnail upload failed");
                None
            }
        };

        tracing::info!(
            key = %key,
            size,
            width = rendered.width,
            height = rendered.height,
            "stored image"
        );

        Ok(StoredImage {
            url: self.public_url(&key),
            thumbnail_url,
            media_id: key,
            width: Some(rendered.width),
            height: Some(rendered.height),
            format,
            size,
        })
    }

    async fn delete_image(&self, media_id: &str) -> Result<()> {
        self.delete_object(media_id).await?;
        if let Err(err) = self.delete_object(&thumbnail_key(media_id)).await {
            tracing::warn!(media_id, error = %format!("{err:#}"), "thumbnail delete failed");
        }
        Ok(())
    }
}

struct RenderedThumbnail {
    thumbnail: Vec<u8>,
    width: u32,
    height: u32,
}

/// Decodes the upload (rejecting files that are not really images) and
/// renders a JPEG thumbnail bounded by `THUMBNAIL_WIDTH` x `THUMBNAIL_HEIGHT`.
fn render_thumbnail(bytes: &[u8]) -> Result<RenderedThumbnail> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("failed to sniff image format")?
        .decode()
        .context("file is not a decodable image")?;
    let (width, height) = image.dimensions();

    let thumbnail = if width > THUMBNAIL_WIDTH || height > THUMBNAIL_HEIGHT {
        image.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT)
    } else {
        image
    };

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(thumbnail.to_rgb8())
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .context("failed to encode thumbnail")?;

    Ok(RenderedThumbnail {
        thumbnail: cursor.into_inner(),
        width,
        height,
    })
}

pub fn media_key(folder: &str, content_type: &str) -> String {
    let extension = mime_guess::get_mime_extensions_str(content_type)
        .and_then(|extensions| {
            extensions
                .iter()
                .find(|ext| matches!(**ext, "jpg" | "png" | "webp"))
                .or_else(|| extensions.first())
        })
        .copied()
        .unwrap_or("bin");
    format!("{}/{}.{}", folder.trim_matches('/'), Uuid::new_v4(), extension)
}

/// Thumbnail objects live next to the original: `a/b/<id>.png` → `a/b/<id>_thumb.jpg`.
pub fn thumbnail_key(media_id: &str) -> String {
    let stem = match media_id.rfind('.') {
        Some(dot) if !media_id[dot..].contains('/') => &media_id[..dot],
        _ => media_id,
    };
    format!("{stem}_thumb.jpg")
}

pub fn image_format_name(content_type: &str) -> String {
    let subtype = content_type
        .split('/')
        .nth(1)
        .unwrap_or(content_type)
        .to_ascii_lowercase();
    match subtype.as_str() {
        "jpg" => "jpeg".to_string(),
        _ => subtype,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_folder_and_extension() {
        let key = media_key("properties/5", "image/png");
        assert!(key.starts_with("properties/5/"));
        assert!(key.ends_with(".png"));

        let jpeg = media_key("/uploads/", "image/jpeg");
        assert!(jpeg.starts_with("uploads/"));
        assert!(jpeg.ends_with(".jpg") || jpeg.ends_with(".jpeg") || jpeg.ends_with(".jpe"));
    }

    #[test]
    fn thumbnail_keys_sit_next_to_originals() {
        assert_eq!(
            thumbnail_key("properties/5/abc.webp"),
            "properties/5/abc_thumb.jpg"
        );
        assert_eq!(thumbnail_key("a.b/noext"), "a.b/noext_thumb.jpg");
    }

    #[test]
    fn format_names() {
        assert_eq!(image_format_name("image/jpg"), "jpeg");
        assert_eq!(image_format_name("image/WEBP"), "webp");
    }

    #[test]
    fn thumbnails_are_bounded() {
        let source = DynamicImage::new_rgb8(1200, 900);
        let mut encoded = Cursor::new(Vec::new());
        source.write_to(&mut encoded, ImageFormat::Png).unwrap();

        let rendered = render_thumbnail(encoded.get_ref()).unwrap();
        assert_eq!((rendered.width, rendered.height), (1200, 900));

        let thumb = image::load_from_memory(&rendered.thumbnail).unwrap();
        assert!(thumb.width() <= THUMBNAIL_WIDTH);
        assert!(thumb.height() <= THUMBNAIL_HEIGHT);
    }

    #[test]
    fn non_images_are_rejected() {
        assert!(render_thumbnail(b"%PDF-1.7 not an image").is_err());
    }
}
