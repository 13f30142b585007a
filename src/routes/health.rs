use axum::{
    extract::OriginalUri,
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};

pub async fn health_check() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "OK",
            "message": "Immobilien API läuft",
            "timestamp": Utc::now(),
        })),
    )
}

pub async fn not_found(OriginalUri(uri): OriginalUri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint nicht gefunden",
            "path": uri.path(),
        })),
    )
}
