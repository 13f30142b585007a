use diesel::dsl::count_star;
use diesel::expression::BoxableExpression;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Bool;
use serde::Deserialize;

use crate::models::{ListingStatus, OfferType, PropertyType};
use crate::schema::properties;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

pub type ListingPredicate = Box<dyn BoxableExpression<properties::table, Pg, SqlType = Bool>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSort {
    PriceAsc,
    PriceDesc,
    SizeAsc,
    SizeDesc,
    #[default]
    Newest,
    Oldest,
}

/// Declarative listing filter. Absent fields impose no constraint; present
/// fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
    pub property_type: Option<PropertyType>,
    pub offer_type: Option<OfferType>,
    pub status: Option<ListingStatus>,
    pub city: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_size: Option<f64>,
    pub max_size: Option<f64>,
    pub rooms: Option<i32>,
    pub featured: Option<bool>,
}

impl ListingFilter {
    /// The predicate list both the page and the count query are built from.
    pub fn predicates(&self) -> Vec<ListingPredicate> {
        let mut predicates: Vec<ListingPredicate> = Vec::new();

        if let Some(kind) = self.property_type {
            predicates.push(Box::new(properties::property_type.eq(kind.as_str())));
        }
        if let Some(offer) = self.offer_type {
            predicates.push(Box::new(properties::offer_type.eq(offer.as_str())));
        }
        if let Some(status) = self.status {
            predicates.push(Box::new(properties::status.eq(status.as_str())));
        }
        if let Some(city) = self.city.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            predicates.push(Box::new(
                properties::city
                    .assume_not_null()
                    .ilike(format!("%{}%", escape_like(city))),
            ));
        }
        if let Some(min) = self.min_price {
            predicates.push(Box::new(properties::price.ge(min)));
        }
        if let Some(max) = self.max_price {
            predicates.push(Box::new(properties::price.le(max)));
        }
        if let Some(min) = self.min_size {
            predicates.push(Box::new(properties::size.ge(min)));
        }
        if let Some(max) = self.max_size {
            predicates.push(Box::new(properties::size.le(max)));
        }
        if let Some(rooms) = self.rooms {
            predicates.push(Box::new(properties::rooms.eq(rooms)));
        }
        if let Some(featured) = self.featured {
            predicates.push(Box::new(properties::featured.eq(featured)));
        }

        predicates
    }

    pub fn filtered(&self) -> properties::BoxedQuery<'static, Pg> {
        self.predicates()
            .into_iter()
            .fold(properties::table.into_boxed(), |query, predicate| {
                query.filter(predicate)
            })
    }

    pub fn count_query(
        &self,
    ) -> properties::BoxedQuery<'static, Pg, diesel::sql_types::BigInt> {
        self.filtered().select(count_star())
    }

    pub fn page_query(
        &self,
        sort: ListingSort,
        limit: i64,
        offset: i64,
    ) -> properties::BoxedQuery<'static, Pg> {
        let query = self.filtered();
        let query = match sort {
            ListingSort::PriceAsc => query
                .order(properties::price.asc())
                .then_order_by(properties::id.asc()),
            ListingSort::PriceDesc => query
                .order(properties::price.desc())
                .then_order_by(properties::id.desc()),
            ListingSort::SizeAsc => query
                .order(properties::size.asc())
                .then_order_by(properties::id.asc()),
            ListingSort::SizeDesc => query
                .order(properties::size.desc())
                .then_order_by(properties::id.desc()),
            ListingSort::Newest => query
                .order(properties::created_at.desc())
                .then_order_by(properties::id.desc()),
            ListingSort::Oldest => query
                .order(properties::created_at.asc())
                .then_order_by(properties::id.asc()),
        };
        query.limit(limit).offset(offset)
    }
}

/// Escapes LIKE metacharacters so user input only ever matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
