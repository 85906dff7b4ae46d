//! JSON REST surface. Staff routes authenticate with a bearer token and are
//! scoped to the token's workspace; public routes take the workspace from
//! the path.

mod error;
mod public;
mod staff;

pub use error::{ApiError, ErrorBody, ErrorDetail};

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequestParts, MatchedPath, Path, Query, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch};
use axum::{Json, Router};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{StaffAuthSource, StaffIdentity};
use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub auth: Arc<dyn StaffAuthSource>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, auth: Arc<dyn StaffAuthSource>) -> Self {
        Self { engine, auth }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bookings", get(staff::list_bookings))
        .route("/api/bookings/upcoming", get(staff::upcoming))
        .route("/api/bookings/today", get(staff::today))
        .route(
            "/api/bookings/types",
            get(staff::list_booking_types).post(staff::create_booking_type),
        )
        .route("/api/bookings/types/:id", patch(staff::update_booking_type))
        .route(
            "/api/bookings/types/:id/availability",
            get(staff::list_rules).post(staff::add_rule),
        )
        .route(
            "/api/bookings/types/:id/availability/:rule_id",
            delete(staff::remove_rule),
        )
        .route("/api/bookings/:id", get(staff::get_booking))
        .route("/api/bookings/:id/status", patch(staff::update_status))
        .route("/api/bookings/public/:workspace_id", axum::routing::post(public::submit))
        .route("/api/bookings/public/:workspace_id/types", get(public::booking_types))
        .route("/api/bookings/public/:workspace_id/availability", get(public::availability))
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The router behind one server-wide cap on in-flight requests. The
/// semaphore is shared by every route the layer is cloned onto.
pub fn app(state: AppState, max_in_flight: usize) -> Router {
    router(state).layer(GlobalConcurrencyLimitLayer::new(max_in_flight))
}

async fn health() -> &'static str {
    "ok"
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let response = next.run(request).await;
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

/// Authenticated staff caller, from `Authorization: Bearer <token>`.
pub struct Staff(pub StaffIdentity);

impl Staff {
    pub fn require_owner(&self) -> Result<(), ApiError> {
        if self.0.is_owner() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("owner role required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Staff {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(token) = token else {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(ApiError::Unauthorized("missing bearer token"));
        };
        match state.auth.resolve(token).await {
            Some(identity) => Ok(Staff(identity)),
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(ApiError::Unauthorized("unknown bearer token"))
            }
        }
    }
}

pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v).map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub(crate) fn path_param<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(v)| v).map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query.map(|Query(v)| v).map_err(|e| ApiError::BadRequest(e.body_text()))
}
