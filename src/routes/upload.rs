use axum::extract::{multipart::Field, Multipart, State};
use axum::Json;
use diesel::prelude::*;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::policy::{authorize, Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::listings::{self, compose, ListingImage};
use crate::media::{ImageUpload, StoredImage};
use crate::models::{NewPropertyImage, PropertyImage};
use crate::schema::{properties, property_images};
use crate::state::AppState;
use crate::tasks;
use crate::validation::IdPath;

use super::properties::authorize_listing;

pub const MAX_FILES_PER_BATCH: usize = 10;
const SINGLE_UPLOAD_FOLDER: &str = "uploads";
const IMAGE_NOT_FOUND: &str = "Bild nicht gefunden";

#[derive(Debug, Serialize)]
pub struct FailedUpload {
    pub filename: String,
    pub error: String,
}

fn multipart_error(err: impl std::fmt::Display) -> AppError {
    AppError::bad_request(format!("Ungültige Multipart-Daten: {err}"))
}

/// Rejects files the media store must never see: wrong type or too large.
pub fn check_upload(config: &AppConfig, upload: &ImageUpload) -> AppResult<()> {
    let name = upload.file_name.as_deref().unwrap_or("Datei");
    if !config.is_allowed_file_type(&upload.content_type) {
        return Err(AppError::bad_request(format!(
            "{name}: Nur Bilddateien sind erlaubt (JPEG, PNG, WebP)"
        )));
    }
    if upload.bytes.is_empty() {
        return Err(AppError::bad_request(format!("{name}: Datei ist leer")));
    }
    if upload.bytes.len() > config.max_file_size {
        return Err(AppError::bad_request(format!(
            "{name}: Datei ist zu groß (max. {:.1} MB)",
            config.max_file_size as f64 / (1024.0 * 1024.0)
        )));
    }
    Ok(())
}

async fn read_image(field: Field<'_>) -> AppResult<ImageUpload> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field
        .content_type()
        .map(str::to_string)
        .or_else(|| {
            file_name
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first_raw())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let bytes = field.bytes().await.map_err(multipart_error)?;

    Ok(ImageUpload {
        file_name,
        content_type,
        bytes,
    })
}

pub async fn upload_image(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Create, Resource::Media)?;

    let mut upload: Option<ImageUpload> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        if name.as_deref() == Some("image") {
            upload = Some(read_image(field).await?);
        }
    }
    let upload = upload.ok_or_else(|| AppError::bad_request("Keine Datei hochgeladen"))?;
    check_upload(&state.config, &upload)?;

    let stored = state
        .media
        .upload_image(SINGLE_UPLOAD_FOLDER, upload)
        .await
        .map_err(|err| AppError::upstream(format!("{err:#}")))?;

    tracing::info!(media_id = %stored.media_id, user_id = actor.id, "image uploaded");
    Ok(Json(json!({
        "message": "Bild erfolgreich hochgeladen",
        "image": stored,
    })))
}

/// Uploads up to ten images for one listing. Each file succeeds or fails on
/// its own; only a batch where every file failed is an error.
pub async fn upload_property_images(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Create, Resource::Media)?;

    let mut property_id: Option<i32> = None;
    let mut uploads: Vec<ImageUpload> = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("property_id") => {
                let value = field.text().await.map_err(multipart_error)?;
                let parsed = value
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| AppError::invalid_field("property_id", "Ungültige Immobilien-ID"))?;
                property_id = Some(parsed);
            }
            Some("images") => {
                if uploads.len() == MAX_FILES_PER_BATCH {
                    return Err(AppError::bad_request(format!(
                        "Maximal {MAX_FILES_PER_BATCH} Dateien pro Upload"
                    )));
                }
                uploads.push(read_image(field).await?);
            }
            _ => {}
        }
    }

    let property_id = property_id
        .ok_or_else(|| AppError::invalid_field("property_id", "Immobilien-ID ist erforderlich"))?;
    if uploads.is_empty() {
        return Err(AppError::bad_request("Keine Dateien hochgeladen"));
    }
    for upload in &uploads {
        check_upload(&state.config, upload)?;
    }

    let checker = actor.clone();
    state
        .db
        .run(move |conn| authorize_listing(conn, &checker, property_id, Action::Update))
        .await?;

    let folder = format!("properties/{property_id}");
    let results = join_all(uploads.into_iter().map(|upload| {
        let media = state.media.clone();
        let folder = folder.clone();
        async move {
            let filename = upload.file_name.clone().unwrap_or_else(|| "Datei".to_string());
            (filename, media.upload_image(&folder, upload).await)
        }
    }))
    .await;

    let mut stored: Vec<StoredImage> = Vec::new();
    let mut failed: Vec<FailedUpload> = Vec::new();
    for (filename, result) in results {
        match result {
            Ok(image) => stored.push(image),
            Err(err) => {
                tracing::warn!(property_id, %filename, error = %format!("{err:#}"), "image upload failed");
                failed.push(FailedUpload {
                    filename,
                    error: "Upload fehlgeschlagen".to_string(),
                });
            }
        }
    }
    if stored.is_empty() {
        return Err(AppError::upstream(format!(
            "all {} uploads for listing {property_id} failed",
            failed.len()
        ))
        .with_message("Keine Bilder konnten hochgeladen werden"));
    }

    let media_ids: Vec<String> = stored.iter().map(|image| image.media_id.clone()).collect();
    let inserted = state
        .db
        .transaction(move |conn| {
            let (next_order, has_primary) = listings::image_slots(conn, property_id)?;
            let rows: Vec<NewPropertyImage> = stored
                .into_iter()
                .enumerate()
                .map(|(index, image)| NewPropertyImage {
                    property_id,
                    image_url: image.url,
                    thumbnail_url: image.thumbnail_url,
                    media_id: Some(image.media_id),
                    title: None,
                    is_primary: !has_primary && index == 0,
                    display_order: next_order + index as i32,
                })
                .collect();
            listings::insert_images(conn, &rows)
        })
        .await;

    let inserted = match inserted {
        Ok(rows) => rows,
        Err(err) => {
            let media = state.media.clone();
            tasks::detach("discard_unrecorded_media", async move {
                for media_id in media_ids {
                    media.delete_image(&media_id).await?;
                }
                Ok(())
            });
            return Err(err);
        }
    };

    tracing::info!(
        property_id,
        uploaded = inserted.len(),
        failed = failed.len(),
        user_id = actor.id,
        "listing images uploaded"
    );

    let images: Vec<ListingImage> = inserted.into_iter().map(ListingImage::from).collect();
    Ok(Json(json!({
        "message": format!("{} Bild(er) erfolgreich hochgeladen", images.len()),
        "images": images,
        "failed": failed,
    })))
}

pub async fn delete_image(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(image_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Delete, Resource::Media)?;
    let actor_id = actor.id;

    let removed = state
        .db
        .transaction(move |conn| {
            let (image, owner_id) = property_images::table
                .inner_join(properties::table)
                .filter(property_images::id.eq(image_id))
                .select((property_images::all_columns, properties::user_id))
                .first::<(PropertyImage, Option<i32>)>(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found(IMAGE_NOT_FOUND))?;
            authorize(&actor, Action::Delete, Resource::Listing { owner_id })?;

            diesel::delete(property_images::table.find(image_id)).execute(conn)?;

            if image.is_primary {
                promote_next_primary(conn, image.property_id)?;
            }
            Ok(image)
        })
        .await?;

    if let Some(media_id) = removed.media_id.as_deref() {
        if let Err(err) = state.media.delete_image(media_id).await {
            tracing::warn!(image_id, media_id, error = %format!("{err:#}"), "stored image not removed");
        }
    }

    tracing::info!(image_id, property_id = removed.property_id, user_id = actor_id, "image deleted");
    Ok(Json(json!({ "message": "Bild erfolgreich gelöscht" })))
}

/// Hands the primary flag to the first remaining image in display order.
fn promote_next_primary(conn: &mut PgConnection, property_id: i32) -> AppResult<()> {
    let mut remaining: Vec<PropertyImage> = property_images::table
        .filter(property_images::property_id.eq(property_id))
        .load(conn)?;
    remaining.sort_by(compose::display_order);
    if let Some(next) = remaining.first() {
        diesel::update(property_images::table.find(next.id))
            .set(property_images::is_primary.eq(true))
            .execute(conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn config() -> AppConfig {
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
            allowed_file_types: vec!["image/png".into(), "image/jpeg".into()],
            smtp: None,
            email_from: "noreply@example.com".into(),
            admin_email: None,
            site_name: "Immobilien".into(),
            site_url: None,
            admin_username: "admin".into(),
            admin_password: None,
        }
    }

    fn upload(content_type: &str, size: usize) -> ImageUpload {
        ImageUpload {
            file_name: Some("wohnzimmer.png".into()),
            content_type: content_type.into(),
            bytes: Bytes::from(vec![0u8; size]),
        }
    }

    #[test]
    fn limits_are_enforced_before_upload() {
        assert!(check_upload(&config(), &upload("image/png", 512)).is_ok());

        let too_big = check_upload(&config(), &upload("image/png", 2048)).unwrap_err();
        assert!(too_big.message().contains("zu groß"));

        let wrong_type = check_upload(&config(), &upload("application/pdf", 10)).unwrap_err();
        assert!(wrong_type.message().contains("Nur Bilddateien"));

        assert!(check_upload(&config(), &upload("image/png", 0)).is_err());
    }
}
