use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::models::HealthResponse;

/// Health check handler
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        message: "Portcullis auth service is running".to_string(),
    })
}

pub async fn ok() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
pub struct ErrorQuery {
    pub error: Option<String>,
}

/// Landing page for failed OAuth flows without an error callback URL
pub async fn error_page(query: web::Query<ErrorQuery>) -> HttpResponse {
    let error = query.into_inner().error.unwrap_or_else(|| "unknown".to_string());
    HttpResponse::Ok().json(serde_json::json!({ "error": error }))
}
