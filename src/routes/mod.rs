use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod contact;
pub mod health;
pub mod properties;
pub mod upload;
pub mod users;

/// Headroom for multipart boundaries and the non-file fields of a batch.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        tracing::warn!(origin = value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());
    let body_limit =
        state.config.max_file_size * upload::MAX_FILES_PER_BATCH + MULTIPART_OVERHEAD;
    let require_user =
        || middleware::from_extractor_with_state::<AuthenticatedUser, _>(state.clone());

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/change-password", put(auth::change_password))
        .route("/logout", post(auth::logout));

    let property_routes = Router::new()
        .route(
            "/",
            get(properties::list_properties).post(properties::create_property),
        )
        .route("/categorized", get(properties::categorized_properties))
        .route(
            "/:id",
            get(properties::get_property)
                .put(properties::update_property)
                .delete(properties::delete_property),
        )
        .route("/:id/similar", get(properties::similar_properties))
        .route(
            "/:id/favorite",
            put(properties::add_favorite).delete(properties::remove_favorite),
        );

    let contact_staff_routes = Router::new()
        .route("/inquiries", get(contact::list_inquiries))
        .route(
            "/inquiries/:id",
            get(contact::get_inquiry).put(contact::update_inquiry),
        )
        .route("/stats", get(contact::inquiry_stats))
        .route_layer(require_user());

    let contact_routes = Router::new()
        .route("/inquiry", post(contact::submit_inquiry))
        .route("/general", post(contact::general_contact))
        .merge(contact_staff_routes);

    let upload_routes = Router::new()
        .route("/image", post(upload::upload_image))
        .route("/image/:image_id", delete(upload::delete_image))
        .route("/property-images", post(upload::upload_property_images))
        .route_layer(require_user());

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/stats/overview", get(users::user_stats))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route_layer(require_user());

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/properties", property_routes)
        .nest("/api/contact", contact_routes)
        .nest("/api/upload", upload_routes)
        .nest("/api/users", users_routes)
        .route("/api/health", get(health::health_check))
        .fallback(health::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
