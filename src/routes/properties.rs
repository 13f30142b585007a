use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::auth::policy::{authorize, Action, Resource};
use crate::auth::{AuthenticatedUser, MaybeUser};
use crate::error::{AppError, AppResult};
use crate::listings::{
    self, compose, ListingFilter, ListingSort, RecencyPartition, SearchPage,
    DEFAULT_PAGE_SIZE, DEFAULT_RECENCY_DAYS, DEFAULT_SIMILAR_LIMIT,
};
use crate::models::{
    ListingStatus, NewProperty, NewPropertyImage, OfferType, Property, PropertyType, Role,
};
use crate::schema::{properties, property_images};
use crate::state::AppState;
use crate::tasks;
use crate::utils::json::{non_blank, nullable};
use crate::validation::{finite, IdPath, ValidJson, ValidQuery};

pub const PROPERTY_NOT_FOUND: &str = "Immobilie nicht gefunden";

/// `status=all` lifts the default `available` restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusParam {
    All,
    Available,
    Reserved,
    Sold,
    Rented,
}

impl StatusParam {
    fn into_status(self) -> Option<ListingStatus> {
        match self {
            StatusParam::All => None,
            StatusParam::Available => Some(ListingStatus::Available),
            StatusParam::Reserved => Some(ListingStatus::Reserved),
            StatusParam::Sold => Some(ListingStatus::Sold),
            StatusParam::Rented => Some(ListingStatus::Rented),
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SearchParams {
    #[serde(rename = "type")]
    pub property_type: Option<PropertyType>,
    pub offer_type: Option<OfferType>,
    pub status: Option<StatusParam>,
    pub city: Option<String>,
    #[validate(range(min = 0.0, message = "Mindestpreis darf nicht negativ sein"))]
    pub min_price: Option<f64>,
    #[validate(range(min = 0.0, message = "Höchstpreis darf nicht negativ sein"))]
    pub max_price: Option<f64>,
    #[validate(range(min = 0.0, message = "Mindestfläche darf nicht negativ sein"))]
    pub min_size: Option<f64>,
    #[validate(range(min = 0.0, message = "Höchstfläche darf nicht negativ sein"))]
    pub max_size: Option<f64>,
    #[validate(range(min = 1, message = "Zimmeranzahl muss mindestens 1 sein"))]
    pub rooms: Option<i32>,
    pub featured: Option<bool>,
    pub sort: Option<ListingSort>,
    #[validate(range(min = 1, max = 100, message = "Limit muss zwischen 1 und 100 liegen"))]
    pub limit: Option<i64>,
    #[validate(range(
        min = 0,
        max = 2_147_483_647,
        message = "Offset muss zwischen 0 und 2147483647 liegen"
    ))]
    pub offset: Option<i64>,
}

impl SearchParams {
    /// Cross-field checks and defaults on top of the per-field rules.
    pub fn into_filter(self) -> AppResult<(ListingFilter, ListingSort, i64, i64)> {
        let min_price = finite("min_price", self.min_price)?;
        let max_price = finite("max_price", self.max_price)?;
        let min_size = finite("min_size", self.min_size)?;
        let max_size = finite("max_size", self.max_size)?;

        if let (Some(min), Some(max)) = (min_price, max_price) {
            if min > max {
                return Err(AppError::invalid_field(
                    "min_price",
                    "Mindestpreis darf nicht größer als der Höchstpreis sein",
                ));
            }
        }
        if let (Some(min), Some(max)) = (min_size, max_size) {
            if min > max {
                return Err(AppError::invalid_field(
                    "min_size",
                    "Mindestfläche darf nicht größer als die Höchstfläche sein",
                ));
            }
        }

        let status = match self.status {
            Some(param) => param.into_status(),
            None => Some(ListingStatus::Available),
        };

        let filter = ListingFilter {
            property_type: self.property_type,
            offer_type: self.offer_type,
            status,
            city: non_blank(self.city),
            min_price,
            max_price,
            min_size,
            max_size,
            rooms: self.rooms,
            featured: self.featured,
        };

        Ok((
            filter,
            self.sort.unwrap_or_default(),
            self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            self.offset.unwrap_or(0),
        ))
    }
}

pub async fn list_properties(
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<SearchParams>,
) -> AppResult<Json<SearchPage>> {
    let (filter, sort, limit, offset) = params.into_filter()?;
    let page = state
        .db
        .run(move |conn| listings::search(conn, &filter, sort, limit, offset))
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategorizeParams {
    #[validate(range(min = 1, max = 365, message = "Tage müssen zwischen 1 und 365 liegen"))]
    pub days: Option<i64>,
}

pub async fn categorized_properties(
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<CategorizeParams>,
) -> AppResult<Json<RecencyPartition>> {
    let days = params.days.unwrap_or(DEFAULT_RECENCY_DAYS);
    let partition = state
        .db
        .run(move |conn| listings::categorize(conn, days, Utc::now()))
        .await?;
    Ok(Json(partition))
}

pub async fn get_property(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    IdPath(property_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    let viewer_id = viewer.map(|user| user.id);
    let detail = state
        .db
        .run(move |conn| listings::load_detail(conn, property_id, viewer_id))
        .await?
        .ok_or_else(|| AppError::not_found(PROPERTY_NOT_FOUND))?;

    let db = state.db.clone();
    tasks::detach("increment_views", async move {
        db.run(move |conn| listings::increment_views(conn, property_id))
            .await
            .map_err(anyhow::Error::from)
    });

    Ok(Json(json!({ "property": detail })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SimilarParams {
    #[validate(range(min = 1, max = 20, message = "Limit muss zwischen 1 und 20 liegen"))]
    pub limit: Option<i64>,
}

pub async fn similar_properties(
    State(state): State<AppState>,
    IdPath(property_id): IdPath<i32>,
    ValidQuery(params): ValidQuery<SimilarParams>,
) -> AppResult<Json<Value>> {
    let limit = params.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    let similar = state
        .db
        .run(move |conn| {
            let reference = listings::find_property(conn, property_id)?
                .ok_or_else(|| AppError::not_found(PROPERTY_NOT_FOUND))?;
            listings::find_similar(conn, &reference, limit)
        })
        .await?;
    Ok(Json(json!({ "similar": similar })))
}

/// An image that was uploaded before the listing existed.
#[derive(Debug, Deserialize, Validate)]
pub struct ListingImageInput {
    #[validate(length(min = 1, message = "Bild-URL ist erforderlich"))]
    pub image_url: String,
    pub thumbnail_url: Option<String>,
    pub media_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePropertyRequest {
    #[validate(length(min = 5, message = "Titel muss mindestens 5 Zeichen lang sein"))]
    pub title: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub offer_type: OfferType,
    #[validate(range(min = 0.0, message = "Preis darf nicht negativ sein"))]
    pub price: f64,
    #[validate(range(exclusive_min = 0.0, message = "Fläche muss größer als 0 sein"))]
    pub size: f64,
    #[validate(range(min = 1, message = "Zimmeranzahl muss mindestens 1 sein"))]
    pub rooms: i32,
    #[validate(range(min = 0, message = "Badezimmeranzahl darf nicht negativ sein"))]
    pub bathrooms: Option<i32>,
    #[validate(range(min = 1000, max = 2100, message = "Ungültiges Baujahr"))]
    pub year_built: Option<i32>,
    #[validate(length(min = 1, message = "Standort ist erforderlich"))]
    pub location: String,
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[validate(length(min = 20, message = "Beschreibung muss mindestens 20 Zeichen lang sein"))]
    pub description: String,
    pub features: Option<Vec<String>>,
    pub status: Option<ListingStatus>,
    pub featured: Option<bool>,
    #[validate(range(min = -90.0, max = 90.0, message = "Ungültiger Breitengrad"))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Ungültiger Längengrad"))]
    pub longitude: Option<f64>,
    #[validate(nested)]
    pub images: Option<Vec<ListingImageInput>>,
}

fn clean_features(features: Vec<String>) -> Vec<String> {
    features
        .into_iter()
        .map(|feature| feature.trim().to_string())
        .filter(|feature| !feature.is_empty())
        .collect()
}

pub async fn create_property(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    ValidJson(payload): ValidJson<CreatePropertyRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    authorize(&actor, Action::Create, Resource::Listing { owner_id: None })?;
    if payload.location.trim().is_empty() {
        return Err(AppError::invalid_field("location", "Standort ist erforderlich"));
    }

    let features = compose::encode_features(&clean_features(payload.features.unwrap_or_default()))?;
    let new_property = NewProperty {
        title: payload.title.trim().to_string(),
        property_type: payload.property_type.as_str().to_string(),
        offer_type: payload.offer_type.as_str().to_string(),
        price: payload.price,
        size: payload.size,
        rooms: payload.rooms,
        bathrooms: payload.bathrooms.unwrap_or(1),
        year_built: payload.year_built,
        location: payload.location.trim().to_string(),
        address: non_blank(payload.address),
        zip_code: non_blank(payload.zip_code),
        city: non_blank(payload.city),
        state: non_blank(payload.state),
        latitude: payload.latitude,
        longitude: payload.longitude,
        description: payload.description,
        features,
        status: payload
            .status
            .unwrap_or(ListingStatus::Available)
            .as_str()
            .to_string(),
        featured: payload.featured.unwrap_or(false),
        user_id: Some(actor.id),
        published_at: Some(Utc::now()),
    };
    let images = payload.images.unwrap_or_default();
    let actor_id = actor.id;

    let detail = state
        .db
        .transaction(move |conn| {
            let property: Property = diesel::insert_into(properties::table)
                .values(&new_property)
                .get_result(conn)?;

            let rows: Vec<NewPropertyImage> = images
                .into_iter()
                .enumerate()
                .map(|(index, image)| NewPropertyImage {
                    property_id: property.id,
                    image_url: image.image_url,
                    thumbnail_url: non_blank(image.thumbnail_url),
                    media_id: non_blank(image.media_id),
                    title: non_blank(image.title),
                    is_primary: index == 0,
                    display_order: index as i32,
                })
                .collect();
            listings::insert_images(conn, &rows)?;

            listings::load_detail(conn, property.id, Some(actor_id))?
                .ok_or_else(|| AppError::internal("created listing vanished"))
        })
        .await?;

    tracing::info!(
        property_id = detail.listing.id,
        user_id = actor_id,
        images = detail.listing.image_count,
        "listing created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Immobilie erfolgreich erstellt",
            "property": detail,
        })),
    ))
}

/// Field rules live in `into_changeset` because most of them apply to
/// doubly optional values.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdatePropertyRequest {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub property_type: Option<PropertyType>,
    pub offer_type: Option<OfferType>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub rooms: Option<i32>,
    pub bathrooms: Option<i32>,
    #[serde(default, deserialize_with = "nullable")]
    pub year_built: Option<Option<i32>>,
    pub location: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub zip_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub state: Option<Option<String>>,
    pub description: Option<String>,
    pub features: Option<Vec<String>>,
    pub status: Option<ListingStatus>,
    pub featured: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub latitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub longitude: Option<Option<f64>>,
}

// Nullable columns clear on explicit `null`; `None` leaves the column alone.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = properties)]
pub struct PropertyChangeset {
    title: Option<String>,
    property_type: Option<String>,
    offer_type: Option<String>,
    price: Option<f64>,
    size: Option<f64>,
    rooms: Option<i32>,
    bathrooms: Option<i32>,
    year_built: Option<Option<i32>>,
    location: Option<String>,
    address: Option<Option<String>>,
    zip_code: Option<Option<String>>,
    city: Option<Option<String>>,
    state: Option<Option<String>>,
    description: Option<String>,
    features: Option<String>,
    status: Option<String>,
    featured: Option<bool>,
    latitude: Option<Option<f64>>,
    longitude: Option<Option<f64>>,
    updated_at: DateTime<Utc>,
}

impl UpdatePropertyRequest {
    pub fn into_changeset(self, now: DateTime<Utc>) -> AppResult<PropertyChangeset> {
        let mut errors = Vec::new();
        let mut reject = |field: &str, message: &str| {
            errors.push(crate::error::FieldError {
                field: field.to_string(),
                message: message.to_string(),
            })
        };

        if matches!(&self.title, Some(title) if title.trim().chars().count() < 5) {
            reject("title", "Titel muss mindestens 5 Zeichen lang sein");
        }
        if matches!(self.price, Some(price) if !price.is_finite() || price < 0.0) {
            reject("price", "Preis darf nicht negativ sein");
        }
        if matches!(self.size, Some(size) if !size.is_finite() || size <= 0.0) {
            reject("size", "Fläche muss größer als 0 sein");
        }
        if matches!(self.rooms, Some(rooms) if rooms < 1) {
            reject("rooms", "Zimmeranzahl muss mindestens 1 sein");
        }
        if matches!(self.bathrooms, Some(bathrooms) if bathrooms < 0) {
            reject("bathrooms", "Badezimmeranzahl darf nicht negativ sein");
        }
        if matches!(&self.location, Some(location) if location.trim().is_empty()) {
            reject("location", "Standort ist erforderlich");
        }
        if matches!(&self.description, Some(text) if text.chars().count() < 20) {
            reject("description", "Beschreibung muss mindestens 20 Zeichen lang sein");
        }
        if matches!(self.latitude, Some(Some(lat)) if !(-90.0..=90.0).contains(&lat)) {
            reject("latitude", "Ungültiger Breitengrad");
        }
        if matches!(self.longitude, Some(Some(lng)) if !(-180.0..=180.0).contains(&lng)) {
            reject("longitude", "Ungültiger Längengrad");
        }
        if !errors.is_empty() {
            return Err(AppError::validation(errors));
        }

        let features = match self.features {
            Some(features) => Some(compose::encode_features(&clean_features(features))?),
            None => None,
        };

        Ok(PropertyChangeset {
            title: self.title.map(|title| title.trim().to_string()),
            property_type: self.property_type.map(|kind| kind.as_str().to_string()),
            offer_type: self.offer_type.map(|offer| offer.as_str().to_string()),
            price: self.price,
            size: self.size,
            rooms: self.rooms,
            bathrooms: self.bathrooms,
            year_built: self.year_built,
            location: self.location.map(|location| location.trim().to_string()),
            address: self.address.map(non_blank),
            zip_code: self.zip_code.map(non_blank),
            city: self.city.map(non_blank),
            state: self.state.map(non_blank),
            description: self.description,
            features,
            status: self.status.map(|status| status.as_str().to_string()),
            featured: self.featured,
            latitude: self.latitude,
            longitude: self.longitude,
            updated_at: now,
        })
    }

    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.property_type.is_none()
            && self.offer_type.is_none()
            && self.price.is_none()
            && self.size.is_none()
            && self.rooms.is_none()
            && self.bathrooms.is_none()
            && self.year_built.is_none()
            && self.location.is_none()
            && self.address.is_none()
            && self.zip_code.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.description.is_none()
            && self.features.is_none()
            && self.status.is_none()
            && self.featured.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

/// Loads the listing's owner and checks the actor may perform `action` on it.
pub fn authorize_listing(
    conn: &mut PgConnection,
    actor: &AuthenticatedUser,
    property_id: i32,
    action: Action,
) -> AppResult<()> {
    let owner_id: Option<i32> = properties::table
        .find(property_id)
        .select(properties::user_id)
        .first::<Option<i32>>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(PROPERTY_NOT_FOUND))?;
    authorize(actor, action, Resource::Listing { owner_id })
}

pub async fn update_property(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(property_id): IdPath<i32>,
    ValidJson(payload): ValidJson<UpdatePropertyRequest>,
) -> AppResult<Json<Value>> {
    actor.require_role(Role::STAFF)?;
    if payload.is_empty() {
        return Err(AppError::bad_request("Keine gültigen Felder zum Aktualisieren"));
    }
    let changeset = payload.into_changeset(Utc::now())?;
    let actor_id = actor.id;

    let detail = state
        .db
        .transaction(move |conn| {
            authorize_listing(conn, &actor, property_id, Action::Update)?;
            diesel::update(properties::table.find(property_id))
                .set(&changeset)
                .execute(conn)?;
            listings::load_detail(conn, property_id, Some(actor.id))?
                .ok_or_else(|| AppError::not_found(PROPERTY_NOT_FOUND))
        })
        .await?;

    tracing::info!(property_id, user_id = actor_id, "listing updated");
    Ok(Json(json!({
        "message": "Immobilie erfolgreich aktualisiert",
        "property": detail,
    })))
}

pub async fn delete_property(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(property_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    actor.require_role(Role::STAFF)?;
    let actor_id = actor.id;

    let media_ids = state
        .db
        .transaction(move |conn| {
            authorize_listing(conn, &actor, property_id, Action::Delete)?;
            let media_ids: Vec<Option<String>> = property_images::table
                .filter(property_images::property_id.eq(property_id))
                .select(property_images::media_id)
                .load(conn)?;
            diesel::delete(properties::table.find(property_id)).execute(conn)?;
            Ok(media_ids.into_iter().flatten().collect::<Vec<String>>())
        })
        .await?;

    tracing::info!(property_id, user_id = actor_id, media = media_ids.len(), "listing deleted");

    if !media_ids.is_empty() {
        let media = state.media.clone();
        tasks::detach("delete_listing_media", async move {
            for media_id in media_ids {
                media.delete_image(&media_id).await?;
            }
            Ok(())
        });
    }

    Ok(Json(json!({ "message": "Immobilie erfolgreich gelöscht" })))
}

async fn set_favorite(
    state: AppState,
    actor: AuthenticatedUser,
    property_id: i32,
    favorited: bool,
) -> AppResult<Json<Value>> {
    let user_id = actor.id;
    state
        .db
        .run(move |conn| {
            listings::find_property(conn, property_id)?
                .ok_or_else(|| AppError::not_found(PROPERTY_NOT_FOUND))?;
            listings::set_favorite(conn, user_id, property_id, favorited)
        })
        .await?;
    Ok(Json(json!({
        "property_id": property_id,
        "is_favorited": favorited,
    })))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(property_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    set_favorite(state, actor, property_id, true).await
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(property_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    set_favorite(state, actor, property_id, false).await
}
