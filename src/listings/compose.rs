use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{Property, PropertyImage};
use crate::schema::property_images;

/// A property row as exposed through the API.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub id: i32,
    pub title: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub offer_type: String,
    pub price: f64,
    pub size: f64,
    pub rooms: i32,
    pub bathrooms: i32,
    pub year_built: Option<i32>,
    pub location: String,
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub features: Vec<String>,
    pub status: String,
    pub featured: bool,
    pub views: i32,
    pub user_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub primary_image: Option<String>,
    pub image_count: usize,
    pub images: Vec<ListingImage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingImage {
    pub id: i32,
    pub image_url: String,
    pub thumbnail_url: Option<String>,
    pub title: Option<String>,
    pub is_primary: bool,
    pub display_order: i32,
}

impl From<PropertyImage> for ListingImage {
    fn from(image: PropertyImage) -> Self {
        Self {
            id: image.id,
            image_url: image.image_url,
            thumbnail_url: image.thumbnail_url,
            title: image.title,
            is_primary: image.is_primary,
            display_order: image.display_order,
        }
    }
}

/// Display order: `display_order ASC`, primary first on ties, then id.
pub fn display_order(a: &PropertyImage, b: &PropertyImage) -> Ordering {
    a.display_order
        .cmp(&b.display_order)
        .then_with(|| b.is_primary.cmp(&a.is_primary))
        .then_with(|| a.id.cmp(&b.id))
}

/// Loads the images of every listing in `property_ids` with one query,
/// grouped by listing and kept in display order.
pub fn load_images_for_properties(
    conn: &mut PgConnection,
    property_ids: &[i32],
) -> AppResult<HashMap<i32, Vec<PropertyImage>>> {
    if property_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<PropertyImage> = property_images::table
        .filter(property_images::property_id.eq_any(property_ids))
        .order((
            property_images::property_id.asc(),
            property_images::display_order.asc(),
            property_images::is_primary.desc(),
            property_images::id.asc(),
        ))
        .load(conn)?;

    Ok(group_images(rows))
}

pub fn group_images(rows: Vec<PropertyImage>) -> HashMap<i32, Vec<PropertyImage>> {
    let mut map: HashMap<i32, Vec<PropertyImage>> = HashMap::new();
    for image in rows {
        map.entry(image.property_id).or_default().push(image);
    }
    for images in map.values_mut() {
        images.sort_by(display_order);
    }
    map
}

pub fn parse_features(property_id: i32, raw: &str) -> AppResult<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Option<Vec<String>>>(raw)
        .map(Option::unwrap_or_default)
        .map_err(|err| {
            AppError::internal(format!(
                "listing {property_id} has malformed features JSON: {err}"
            ))
        })
}

pub fn encode_features(features: &[String]) -> AppResult<String> {
    Ok(serde_json::to_string(features)?)
}

pub fn compose_listing(row: Property, mut images: Vec<PropertyImage>) -> AppResult<Listing> {
    images.sort_by(display_order);
    let features = parse_features(row.id, &row.features)?;
    let primary_image = images
        .iter()
        .find(|image| image.is_primary)
        .or_else(|| images.first())
        .map(|image| image.image_url.clone());
    let images: Vec<ListingImage> = images.into_iter().map(ListingImage::from).collect();

    Ok(Listing {
        id: row.id,
        title: row.title,
        property_type: row.property_type,
        offer_type: row.offer_type,
        price: row.price,
        size: row.size,
        rooms: row.rooms,
        bathrooms: row.bathrooms,
        year_built: row.year_built,
        location: row.location,
        address: row.address,
        zip_code: row.zip_code,
        city: row.city,
        state: row.state,
        country: row.country,
        latitude: row.latitude,
        longitude: row.longitude,
        description: row.description,
        features,
        status: row.status,
        featured: row.featured,
        views: row.views,
        user_id: row.user_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
        published_at: row.published_at,
        primary_image,
        image_count: images.len(),
        images,
    })
}

/// Attaches each listing's image group, preserving row order.
pub fn compose_listings(
    rows: Vec<Property>,
    mut images: HashMap<i32, Vec<PropertyImage>>,
) -> AppResult<Vec<Listing>> {
    rows.into_iter()
        .map(|row| {
            let group = images.remove(&row.id).unwrap_or_default();
            compose_listing(row, group)
        })
        .collect()
}

pub fn load_listings(conn: &mut PgConnection, rows: Vec<Property>) -> AppResult<Vec<Listing>> {
    let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
    let images = load_images_for_properties(conn, &ids)?;
    compose_listings(rows, images)
}

#[derive(Debug, Clone, Serialize)]
pub struct RecencyPartition {
    pub recent: Vec<Listing>,
    pub archived: Vec<Listing>,
    pub total: usize,
    pub threshold_days: i64,
}

/// Splits listings at `now - threshold_days`. The boundary is inclusive:
/// a listing created exactly at the cutoff counts as recent. Both halves are
/// returned newest first.
pub fn partition_by_recency(
    mut listings: Vec<Listing>,
    threshold_days: i64,
    now: DateTime<Utc>,
) -> RecencyPartition {
    let cutoff = now - Duration::days(threshold_days);
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    let total = listings.len();
    let (recent, archived): (Vec<Listing>, Vec<Listing>) = listings
        .into_iter()
        .partition(|listing| listing.created_at >= cutoff);

    RecencyPartition {
        recent,
        archived,
        total,
        threshold_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i32, created_at: DateTime<Utc>) -> Property {
        Property {
            id,
            title: format!("Objekt {id}"),
            property_type: "house".into(),
            offer_type: "sale".into(),
            price: 300_000.0,
            size: 120.0,
            rooms: 4,
            bathrooms: 2,
            year_built: Some(1998),
            location: "Bonn".into(),
            address: None,
            zip_code: None,
            city: Some("Bonn".into()),
            state: None,
            country: "Deutschland".into(),
            latitude: None,
            longitude: None,
            description: "Freistehendes Haus mit Garten".into(),
            features: r#"["Garten","Garage","Keller"]"#.into(),
            status: "available".into(),
            featured: false,
            views: 0,
            user_id: None,
            created_at,
            updated_at: created_at,
            published_at: Some(created_at),
        }
    }

    fn image(id: i32, property_id: i32, display_order: i32, is_primary: bool) -> PropertyImage {
        PropertyImage {
            id,
            property_id,
            image_url: format!("https://cdn.example/{id}.jpg"),
            thumbnail_url: None,
            media_id: None,
            title: None,
            is_primary,
            display_order,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn features_round_trip_in_order() {
        let features = vec!["Balkon".to_string(), "Aufzug".to_string(), "EBK".to_string()];
        let encoded = encode_features(&features).unwrap();
        assert_eq!(parse_features(1, &encoded).unwrap(), features);
    }

    #[test]
    fn null_or_blank_features_are_empty() {
        assert!(parse_features(1, "null").unwrap().is_empty());
        assert!(parse_features(1, "").unwrap().is_empty());
    }

    #[test]
    fn malformed_features_fail_loudly() {
        let err = parse_features(9, "[\"Balkon\"").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn images_sort_by_order_then_primary() {
        let mut images = vec![
            image(1, 1, 2, false),
            image(2, 1, 0, false),
            image(3, 1, 0, true),
            image(4, 1, 1, false),
        ];
        images.sort_by(display_order);
        let ids: Vec<i32> = images.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[test]
    fn grouping_keeps_each_listing_separate() {
        let grouped = group_images(vec![
            image(1, 10, 1, false),
            image(2, 11, 0, true),
            image(3, 10, 0, false),
        ]);
        assert_eq!(grouped[&10].iter().map(|i| i.id).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(grouped[&11].len(), 1);
    }

    #[test]
    fn primary_image_prefers_flag_then_first() {
        let now = Utc::now();
        let flagged = compose_listing(row(1, now), vec![image(1, 1, 0, false), image(2, 1, 1, true)]).unwrap();
        assert_eq!(flagged.primary_image.as_deref(), Some("https://cdn.example/2.jpg"));
        assert_eq!(flagged.image_count, 2);

        let backfilled = compose_listing(row(2, now), vec![image(5, 2, 3, false), image(4, 2, 1, false)]).unwrap();
        assert_eq!(backfilled.primary_image.as_deref(), Some("https://cdn.example/4.jpg"));

        let bare = compose_listing(row(3, now), Vec::new()).unwrap();
        assert!(bare.primary_image.is_none());
        assert_eq!(bare.features, vec!["Garten", "Garage", "Keller"]);
    }

    #[test]
    fn compose_keeps_row_order_and_attaches_groups() {
        let now = Utc::now();
        let mut images = HashMap::new();
        images.insert(2, vec![image(7, 2, 0, true)]);
        let listings = compose_listings(vec![row(2, now), row(1, now)], images).unwrap();
        assert_eq!(listings.iter().map(|l| l.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(listings[0].image_count, 1);
        assert_eq!(listings[1].image_count, 0);
    }

    #[test]
    fn recency_boundary_is_inclusive() {
        let now = Utc::now();
        let rows = vec![
            row(1, now - Duration::days(30)),
            row(2, now - Duration::days(14)),
            row(3, now - Duration::days(14) - Duration::seconds(1)),
            row(4, now - Duration::days(1)),
        ];
        let listings = compose_listings(rows, HashMap::new()).unwrap();
        let partition = partition_by_recency(listings, 14, now);

        assert_eq!(partition.recent.iter().map(|l| l.id).collect::<Vec<_>>(), vec![4, 2]);
        assert_eq!(partition.archived.iter().map(|l| l.id).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(partition.total, 4);
    }
}
