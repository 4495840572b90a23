use std::sync::Arc;

use atelier_common::{AdminStats, Error};
use atelier_config::SecurityConfig;
use atelier_db::{HealthReport, HealthStatus};
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, middleware};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::rate_limit;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/api/health", get(db_health))
        .route("/api/admin/stats", get(admin_stats))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(api)
        .layer(cors_layer(&state.config.security))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if security.cors_origins.iter().any(|o| o == "*") {
        return base.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid cors origin: {origin}");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

/// Maps domain errors onto JSON error responses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("request failed: {}", self.0);
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn db_health(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let db = Arc::clone(&state.db);
    let report: HealthReport = tokio::task::spawn_blocking(move || db.health_check())
        .await
        .map_err(|e| Error::Gateway(format!("health task failed: {e}")))?;
    Ok(health_response(report))
}

fn health_response(report: HealthReport) -> Response {
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

async fn admin_stats(State(state): State<SharedState>) -> Result<Json<AdminStats>, ApiError> {
    let db = Arc::clone(&state.db);
    let stats = tokio::task::spawn_blocking(move || db.admin_stats())
        .await
        .map_err(|e| Error::Gateway(format!("stats task failed: {e}")))??;
    Ok(Json(stats))
}
