//! Listing search and composition.
//!
//! Everything here runs on a borrowed connection inside `Database::run`, so
//! handlers decide where the checkout and transaction boundaries sit.

pub mod compose;
pub mod filter;

use chrono::{DateTime, Utc};
use diesel::dsl::{exists, max};
use diesel::prelude::*;
use diesel::sql_types::{Double, Nullable, Varchar};
use serde::Serialize;

use crate::error::AppResult;
use crate::models::{ListingStatus, NewFavorite, NewPropertyImage, Property, PropertyImage};
use crate::schema::{favorites, properties, property_images, users};

pub use compose::{partition_by_recency, Listing, ListingImage, RecencyPartition};
pub use filter::{ListingFilter, ListingSort, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

pub const DEFAULT_SIMILAR_LIMIT: i64 = 4;
pub const MAX_SIMILAR_LIMIT: i64 = 20;
pub const DEFAULT_RECENCY_DAYS: i64 = 14;

/// Price window around the reference listing that still counts as similar.
const SIMILAR_PRICE_LOWER: f64 = 0.8;
const SIMILAR_PRICE_UPPER: f64 = 1.2;

diesel::define_sql_function!(fn abs(x: Double) -> Double);
diesel::define_sql_function! {
    #[sql_name = "lower"]
    fn lower_city(x: Nullable<Varchar>) -> Nullable<Varchar>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OffsetPagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl OffsetPagination {
    pub fn new(total: i64, limit: i64, offset: i64) -> Self {
        Self {
            total,
            limit,
            offset,
            has_more: total > offset.saturating_add(limit),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub properties: Vec<Listing>,
    pub pagination: OffsetPagination,
}

pub fn search(
    conn: &mut PgConnection,
    filter: &ListingFilter,
    sort: ListingSort,
    limit: i64,
    offset: i64,
) -> AppResult<SearchPage> {
    let total: i64 = filter.count_query().get_result(conn)?;
    let rows: Vec<Property> = filter.page_query(sort, limit, offset).load(conn)?;
    let properties = compose::load_listings(conn, rows)?;

    Ok(SearchPage {
        properties,
        pagination: OffsetPagination::new(total, limit, offset),
    })
}

#[derive(Debug, Serialize)]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: Listing,
    pub created_by_username: Option<String>,
    pub created_by_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorited: Option<bool>,
}

/// Listing with creator names and images; `is_favorited` is only filled for
/// an authenticated viewer.
pub fn load_detail(
    conn: &mut PgConnection,
    property_id: i32,
    viewer_id: Option<i32>,
) -> AppResult<Option<ListingDetail>> {
    let row = properties::table
        .left_join(users::table)
        .filter(properties::id.eq(property_id))
        .select((
            properties::all_columns,
            users::username.nullable(),
            users::full_name.nullable(),
        ))
        .first::<(Property, Option<String>, Option<String>)>(conn)
        .optional()?;

    let Some((property, created_by_username, created_by_name)) = row else {
        return Ok(None);
    };

    let images: Vec<PropertyImage> = PropertyImage::belonging_to(&property)
        .order((
            property_images::display_order.asc(),
            property_images::is_primary.desc(),
            property_images::id.asc(),
        ))
        .load(conn)?;

    let is_favorited = match viewer_id {
        Some(user_id) => Some(is_favorite(conn, user_id, property_id)?),
        None => None,
    };

    Ok(Some(ListingDetail {
        listing: compose::compose_listing(property, images)?,
        created_by_username,
        created_by_name,
        is_favorited,
    }))
}

pub fn find_property(conn: &mut PgConnection, property_id: i32) -> AppResult<Option<Property>> {
    Ok(properties::table
        .find(property_id)
        .first::<Property>(conn)
        .optional()?)
}

pub fn increment_views(conn: &mut PgConnection, property_id: i32) -> AppResult<()> {
    diesel::update(properties::table.find(property_id))
        .set(properties::views.eq(properties::views + 1))
        .execute(conn)?;
    Ok(())
}

/// Available listings of the same type and offer that share the reference's
/// city (ignoring case) or sit within ±20% of its price. City matches come first, then the
/// closest price.
pub fn find_similar(
    conn: &mut PgConnection,
    reference: &Property,
    limit: i64,
) -> AppResult<Vec<Listing>> {
    let price = reference.price;
    let lower = price * SIMILAR_PRICE_LOWER;
    let upper = price * SIMILAR_PRICE_UPPER;

    let base = properties::table
        .filter(properties::id.ne(reference.id))
        .filter(properties::status.eq(ListingStatus::Available.as_str()))
        .filter(properties::property_type.eq(reference.property_type.clone()))
        .filter(properties::offer_type.eq(reference.offer_type.clone()));

    let rows: Vec<Property> = match reference.city.clone() {
        Some(city) => base
            .filter(
                lower_city(properties::city)
                    .eq(lower_city(city.clone()))
                    .or(properties::price.between(lower, upper)),
            )
            .order((
                lower_city(properties::city)
                    .eq(lower_city(city))
                    .desc()
                    .nulls_last(),
                abs(properties::price - price).asc(),
                properties::id.asc(),
            ))
            .limit(limit)
            .load(conn)?,
        None => base
            .filter(properties::price.between(lower, upper))
            .order((abs(properties::price - price).asc(), properties::id.asc()))
            .limit(limit)
            .load(conn)?,
    };

    compose::load_listings(conn, rows)
}

pub fn categorize(
    conn: &mut PgConnection,
    threshold_days: i64,
    now: DateTime<Utc>,
) -> AppResult<RecencyPartition> {
    let rows: Vec<Property> = properties::table
        .filter(properties::status.eq(ListingStatus::Available.as_str()))
        .order((properties::created_at.desc(), properties::id.desc()))
        .load(conn)?;
    let listings = compose::load_listings(conn, rows)?;
    Ok(partition_by_recency(listings, threshold_days, now))
}

/// Where the next uploaded image goes in the listing's display order, and
/// whether the listing already has a primary image.
pub fn image_slots(conn: &mut PgConnection, property_id: i32) -> AppResult<(i32, bool)> {
    let highest: Option<i32> = property_images::table
        .filter(property_images::property_id.eq(property_id))
        .select(max(property_images::display_order))
        .first(conn)?;
    let has_primary: bool = diesel::select(exists(
        property_images::table
            .filter(property_images::property_id.eq(property_id))
            .filter(property_images::is_primary.eq(true)),
    ))
    .get_result(conn)?;

    Ok((highest.map_or(0, |order| order + 1), has_primary))
}

pub fn insert_images(
    conn: &mut PgConnection,
    images: &[NewPropertyImage],
) -> AppResult<Vec<PropertyImage>> {
    if images.is_empty() {
        return Ok(Vec::new());
    }
    let mut inserted: Vec<PropertyImage> = diesel::insert_into(property_images::table)
        .values(images)
        .get_results(conn)?;
    inserted.sort_by(compose::display_order);
    Ok(inserted)
}

pub fn is_favorite(conn: &mut PgConnection, user_id: i32, property_id: i32) -> AppResult<bool> {
    Ok(diesel::select(exists(
        favorites::table
            .filter(favorites::user_id.eq(user_id))
            .filter(favorites::property_id.eq(property_id)),
    ))
    .get_result(conn)?)
}

/// Idempotent in both directions.
pub fn set_favorite(
    conn: &mut PgConnection,
    user_id: i32,
    property_id: i32,
    favorited: bool,
) -> AppResult<()> {
    if favorited {
        diesel::insert_into(favorites::table)
            .values(&NewFavorite {
                user_id,
                property_id,
            })
            .on_conflict((favorites::user_id, favorites::property_id))
            .do_nothing()
            .execute(conn)?;
    } else {
        diesel::delete(
            favorites::table
                .filter(favorites::user_id.eq(user_id))
                .filter(favorites::property_id.eq(property_id)),
        )
        .execute(conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_more_only_when_rows_remain() {
        assert!(OffsetPagination::new(45, 20, 20).has_more);
        assert!(!OffsetPagination::new(40, 20, 20).has_more);
        assert!(!OffsetPagination::new(0, 20, 0).has_more);
        assert!(!OffsetPagination::new(5, 20, 40).has_more);
        assert!(!OffsetPagination::new(5, 20, i64::MAX).has_more);
    }
}
