use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::*;

/// Generates `as_str`, `FromStr` and `Display` for the string-backed
/// enumerations stored in VARCHAR columns with CHECK constraints.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} `{other}`",
                        stringify!($name)
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Agent,
    User,
}

string_enum!(Role {
    Admin => "admin",
    Manager => "manager",
    Agent => "agent",
    User => "user",
});

impl Role {
    pub const STAFF: &'static [Role] = &[Role::Admin, Role::Manager, Role::Agent];

    pub fn is_staff(&self) -> bool {
        Self::STAFF.contains(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

string_enum!(UserStatus {
    Active => "active",
    Inactive => "inactive",
    Suspended => "suspended",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[serde(alias = "wohnung")]
    Apartment,
    #[serde(alias = "haus")]
    House,
    #[serde(alias = "gewerbe")]
    Commercial,
    #[serde(alias = "grundstück", alias = "grundstueck")]
    Land,
}

string_enum!(PropertyType {
    Apartment => "apartment",
    House => "house",
    Commercial => "commercial",
    Land => "land",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferType {
    #[serde(alias = "miete")]
    Rent,
    #[serde(alias = "kauf")]
    Sale,
}

string_enum!(OfferType {
    Rent => "rent",
    Sale => "sale",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Available,
    Reserved,
    Sold,
    Rented,
}

string_enum!(ListingStatus {
    Available => "available",
    Reserved => "reserved",
    Sold => "sold",
    Rented => "rented",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InquiryStatus {
    New,
    Contacted,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(InquiryStatus {
    New => "new",
    Contacted => "contacted",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: String,
    pub status: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: String,
    pub status: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = properties)]
pub struct Property {
    pub id: i32,
    pub title: String,
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
    pub features: String,
    pub status: String,
    pub featured: bool,
    pub views: i32,
    pub user_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = properties)]
pub struct NewProperty {
    pub title: String,
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
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub features: String,
    pub status: String,
    pub featured: bool,
    pub user_id: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = property_images)]
#[diesel(belongs_to(Property))]
pub struct PropertyImage {
    pub id: i32,
    pub property_id: i32,
    pub image_url: String,
    pub thumbnail_url: Option<String>,
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub is_primary: bool,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = property_images)]
pub struct NewPropertyImage {
    pub property_id: i32,
    pub image_url: String,
    pub thumbnail_url: Option<String>,
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub is_primary: bool,
    pub display_order: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = inquiries)]
pub struct Inquiry {
    pub id: i32,
    pub property_id: Option<i32>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = inquiries)]
pub struct NewInquiry {
    pub property_id: Option<i32>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = favorites)]
pub struct NewFavorite {
    pub user_id: i32,
    pub property_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn german_listing_kinds_are_accepted_as_aliases() {
        let kind: PropertyType = serde_json::from_str("\"wohnung\"").unwrap();
        assert_eq!(kind, PropertyType::Apartment);
        let offer: OfferType = serde_json::from_str("\"kauf\"").unwrap();
        assert_eq!(offer, OfferType::Sale);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"apartment\"");
    }

    #[test]
    fn stored_values_round_trip_through_from_str() {
        for status in InquiryStatus::ALL {
            assert_eq!(status.as_str().parse::<InquiryStatus>().unwrap(), *status);
        }
        assert!("wohnung".parse::<PropertyType>().is_err());
    }

    #[test]
    fn staff_roles() {
        assert!(Role::Agent.is_staff());
        assert!(!Role::User.is_staff());
    }
}
