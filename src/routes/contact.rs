use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use diesel::{dsl::count_star, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::auth::policy::{authorize, Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::listings;
use crate::mail::templates::{self, Branding, ContactForm};
use crate::models::{Inquiry, InquiryStatus, NewInquiry};
use crate::schema::{inquiries, properties};
use crate::state::AppState;
use crate::tasks;
use crate::utils::json::non_blank;
use crate::utils::pagination::{self, PagePagination};
use crate::validation::{IdPath, ValidJson, ValidQuery};

use super::properties::PROPERTY_NOT_FOUND;

const INQUIRY_NOT_FOUND: &str = "Anfrage nicht gefunden";

#[derive(Debug, Deserialize, Validate)]
pub struct InquiryRequest {
    pub property_id: i32,
    #[validate(length(min = 2, message = "Name muss mindestens 2 Zeichen lang sein"))]
    pub name: String,
    #[validate(email(message = "Gültige E-Mail-Adresse erforderlich"))]
    pub email: String,
    #[validate(length(min = 5, message = "Telefonnummer muss mindestens 5 Zeichen lang sein"))]
    pub phone: Option<String>,
    #[validate(length(min = 10, message = "Nachricht muss mindestens 10 Zeichen lang sein"))]
    pub message: String,
}

/// Stores the inquiry and notifies both sides without waiting on the mail relay.
pub async fn submit_inquiry(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<InquiryRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let property_id = payload.property_id;
    let new_inquiry = NewInquiry {
        property_id: Some(property_id),
        name: payload.name.trim().to_string(),
        email: payload.email.trim().to_string(),
        phone: non_blank(payload.phone),
        message: payload.message,
        status: InquiryStatus::New.as_str().to_string(),
    };

    let (inquiry, property) = state
        .db
        .run(move |conn| {
            let property = listings::find_property(conn, property_id)?
                .ok_or_else(|| AppError::not_found(PROPERTY_NOT_FOUND))?;
            let inquiry: Inquiry = diesel::insert_into(inquiries::table)
                .values(&new_inquiry)
                .get_result(conn)?;
            Ok((inquiry, property))
        })
        .await?;

    tracing::info!(inquiry_id = inquiry.id, property_id, "inquiry received");

    let branding = Branding::from_config(&state.config);
    match state.config.admin_email.as_deref() {
        Some(admin_email) => {
            let message = templates::inquiry_notification(&branding, admin_email, &inquiry, &property);
            let mailer = state.mailer.clone();
            tasks::detach("inquiry_notification", async move { mailer.send(message).await });
        }
        None => tracing::warn!(inquiry_id = inquiry.id, "ADMIN_EMAIL not set; skipping notification"),
    }
    let confirmation = templates::inquiry_confirmation(&branding, &inquiry, &property);
    let mailer = state.mailer.clone();
    tasks::detach("inquiry_confirmation", async move { mailer.send(confirmation).await });

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Anfrage erfolgreich gesendet",
            "inquiry": {
                "id": inquiry.id,
                "property_id": inquiry.property_id,
                "name": inquiry.name,
                "email": inquiry.email,
                "status": inquiry.status,
                "created_at": inquiry.created_at,
            }
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct GeneralContactRequest {
    #[validate(length(min = 2, message = "Name muss mindestens 2 Zeichen lang sein"))]
    pub name: String,
    #[validate(email(message = "Gültige E-Mail-Adresse erforderlich"))]
    pub email: String,
    pub phone: Option<String>,
    #[validate(length(min = 3, message = "Betreff muss mindestens 3 Zeichen lang sein"))]
    pub subject: String,
    #[validate(length(min = 10, message = "Nachricht muss mindestens 10 Zeichen lang sein"))]
    pub message: String,
}

pub async fn general_contact(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<GeneralContactRequest>,
) -> AppResult<Json<Value>> {
    let admin_email = state
        .config
        .admin_email
        .as_deref()
        .ok_or_else(|| AppError::dependency("ADMIN_EMAIL is not configured"))?;

    let form = ContactForm {
        name: payload.name.trim().to_string(),
        email: payload.email.trim().to_string(),
        phone: non_blank(payload.phone),
        subject: payload.subject.trim().to_string(),
        message: payload.message,
    };
    let message =
        templates::general_contact(&Branding::from_config(&state.config), admin_email, &form);

    state
        .mailer
        .send(message)
        .await
        .map_err(|err| AppError::dependency(format!("{err:#}")))?;

    Ok(Json(json!({ "message": "Nachricht erfolgreich gesendet" })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct InquiryListQuery {
    pub status: Option<InquiryStatus>,
    pub property_id: Option<i32>,
    #[validate(range(min = 1, message = "Seite muss mindestens 1 sein"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "Limit muss zwischen 1 und 100 liegen"))]
    pub limit: Option<i64>,
}

fn filtered_inquiries(query: &InquiryListQuery) -> inquiries::BoxedQuery<'static, Pg> {
    let mut statement = inquiries::table.into_boxed();
    if let Some(status) = query.status {
        statement = statement.filter(inquiries::status.eq(status.as_str()));
    }
    if let Some(property_id) = query.property_id {
        statement = statement.filter(inquiries::property_id.eq(property_id));
    }
    statement
}

/// An inquiry with the summary fields of the listing it refers to.
#[derive(Debug, Serialize)]
pub struct InquiryView {
    #[serde(flatten)]
    pub inquiry: InquiryRecord,
    pub property_title: Option<String>,
    pub property_type: Option<String>,
    pub property_price: Option<f64>,
    pub property_location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InquiryRecord {
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

impl From<Inquiry> for InquiryRecord {
    fn from(inquiry: Inquiry) -> Self {
        Self {
            id: inquiry.id,
            property_id: inquiry.property_id,
            name: inquiry.name,
            email: inquiry.email,
            phone: inquiry.phone,
            message: inquiry.message,
            status: inquiry.status,
            notes: inquiry.notes,
            created_at: inquiry.created_at,
            updated_at: inquiry.updated_at,
        }
    }
}

type ListingSummary = (i32, String, String, f64, String);

fn load_listing_summaries(
    conn: &mut PgConnection,
    rows: &[Inquiry],
) -> AppResult<HashMap<i32, ListingSummary>> {
    let ids: Vec<i32> = rows.iter().filter_map(|row| row.property_id).collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let summaries: Vec<ListingSummary> = properties::table
        .filter(properties::id.eq_any(&ids))
        .select((
            properties::id,
            properties::title,
            properties::property_type,
            properties::price,
            properties::location,
        ))
        .load(conn)?;
    Ok(summaries
        .into_iter()
        .map(|summary| (summary.0, summary))
        .collect())
}

fn attach_listings(
    rows: Vec<Inquiry>,
    summaries: &HashMap<i32, ListingSummary>,
) -> Vec<InquiryView> {
    rows.into_iter()
        .map(|inquiry| {
            let summary = inquiry.property_id.and_then(|id| summaries.get(&id));
            InquiryView {
                property_title: summary.map(|s| s.1.clone()),
                property_type: summary.map(|s| s.2.clone()),
                property_price: summary.map(|s| s.3),
                property_location: summary.map(|s| s.4.clone()),
                inquiry: InquiryRecord::from(inquiry),
            }
        })
        .collect()
}

fn load_inquiry_view(conn: &mut PgConnection, inquiry_id: i32) -> AppResult<InquiryView> {
    let inquiry = inquiries::table
        .find(inquiry_id)
        .first::<Inquiry>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(INQUIRY_NOT_FOUND))?;
    let rows = vec![inquiry];
    let summaries = load_listing_summaries(conn, &rows)?;
    attach_listings(rows, &summaries)
        .pop()
        .ok_or_else(|| AppError::not_found(INQUIRY_NOT_FOUND))
}

pub async fn list_inquiries(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    ValidQuery(query): ValidQuery<InquiryListQuery>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Read, Resource::Inquiry)?;
    let (page, limit, offset) = pagination::resolve(query.page, query.limit)?;

    let (total, views) = state
        .db
        .run(move |conn| {
            let total: i64 = filtered_inquiries(&query).count().get_result(conn)?;
            let rows: Vec<Inquiry> = filtered_inquiries(&query)
                .order((inquiries::created_at.desc(), inquiries::id.desc()))
                .limit(limit)
                .offset(offset)
                .load(conn)?;
            let summaries = load_listing_summaries(conn, &rows)?;
            Ok((total, attach_listings(rows, &summaries)))
        })
        .await?;

    Ok(Json(json!({
        "inquiries": views,
        "pagination": PagePagination::new(total, page, limit),
    })))
}

pub async fn get_inquiry(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(inquiry_id): IdPath<i32>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Read, Resource::Inquiry)?;
    let view = state
        .db
        .run(move |conn| load_inquiry_view(conn, inquiry_id))
        .await?;
    Ok(Json(json!({ "inquiry": view })))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateInquiryRequest {
    pub status: InquiryStatus,
    pub notes: Option<String>,
}

pub async fn update_inquiry(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    IdPath(inquiry_id): IdPath<i32>,
    ValidJson(payload): ValidJson<UpdateInquiryRequest>,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Update, Resource::Inquiry)?;
    let status = payload.status;

    let view = state
        .db
        .transaction(move |conn| {
            let updated = diesel::update(inquiries::table.find(inquiry_id))
                .set((
                    inquiries::status.eq(status.as_str()),
                    inquiries::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            if updated == 0 {
                return Err(AppError::not_found(INQUIRY_NOT_FOUND));
            }
            if let Some(notes) = payload.notes {
                diesel::update(inquiries::table.find(inquiry_id))
                    .set(inquiries::notes.eq(notes))
                    .execute(conn)?;
            }
            load_inquiry_view(conn, inquiry_id)
        })
        .await?;

    tracing::info!(inquiry_id, %status, user_id = actor.id, "inquiry updated");
    Ok(Json(json!({
        "message": "Anfrage erfolgreich aktualisiert",
        "inquiry": view,
    })))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct InquiryStats {
    pub total: i64,
    pub new: i64,
    pub contacted: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
}

impl InquiryStats {
    fn add_status(&mut self, status: &str, count: i64) {
        self.total += count;
        match status.parse::<InquiryStatus>() {
            Ok(InquiryStatus::New) => self.new += count,
            Ok(InquiryStatus::Contacted) => self.contacted += count,
            Ok(InquiryStatus::InProgress) => self.in_progress += count,
            Ok(InquiryStatus::Completed) => self.completed += count,
            Ok(InquiryStatus::Cancelled) => self.cancelled += count,
            Err(_) => {}
        }
    }
}

/// Start of the current day, ISO week (Monday) and month, in UTC.
pub fn period_starts(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let week = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let month = today - Duration::days(i64::from(today.day0()));
    let midnight = |date: chrono::NaiveDate| date.and_time(NaiveTime::MIN).and_utc();
    (midnight(today), midnight(week), midnight(month))
}

pub async fn inquiry_stats(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    authorize(&actor, Action::Read, Resource::Inquiry)?;
    let (today, week, month) = period_starts(Utc::now());

    let stats = state
        .db
        .transaction(move |conn| {
            let by_status: Vec<(String, i64)> = inquiries::table
                .group_by(inquiries::status)
                .select((inquiries::status, count_star()))
                .load(conn)?;
            let since = |start: DateTime<Utc>, conn: &mut PgConnection| -> AppResult<i64> {
                Ok(inquiries::table
                    .filter(inquiries::created_at.ge(start))
                    .select(count_star())
                    .first(conn)?)
            };

            let mut stats = InquiryStats {
                today: since(today, conn)?,
                this_week: since(week, conn)?,
                this_month: since(month, conn)?,
                ..Default::default()
            };
            for (status, count) in &by_status {
                stats.add_status(status, *count);
            }
            Ok(stats)
        })
        .await?;

    Ok(Json(json!({ "stats": stats })))
}
