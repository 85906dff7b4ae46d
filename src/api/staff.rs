use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{BookingTypeUpdate, EngineError, NewBookingType, NewRule};
use crate::model::*;

use super::{json_body, path_param, query_params, ApiError, AppState, Staff};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingTypeBody {
    pub name: String,
    pub description: Option<String>,
    pub duration: u32,
    pub location: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub use_business_hours: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingTypeBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration: Option<u32>,
    pub location: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRuleBody {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookingListQuery {
    /// Comma-separated statuses.
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

fn parse_statuses(raw: Option<&str>) -> Result<Vec<BookingStatus>, EngineError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|e: String| EngineError::validation("status", e)))
        .collect()
}

fn parse_hhmm(field: &'static str, raw: &str) -> Result<chrono::NaiveTime, EngineError> {
    hhmm::parse(raw).ok_or_else(|| EngineError::validation(field, "expected HH:mm"))
}

pub async fn list_booking_types(
    State(state): State<AppState>,
    staff: Staff,
) -> Result<Json<Vec<BookingType>>, ApiError> {
    Ok(Json(state.engine.list_booking_types(staff.0.workspace_id).await?))
}

pub async fn create_booking_type(
    State(state): State<AppState>,
    staff: Staff,
    body: Result<Json<CreateBookingTypeBody>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingType>), ApiError> {
    staff.require_owner()?;
    let body = json_body(body)?;
    let bt = state
        .engine
        .create_booking_type(
            staff.0.workspace_id,
            NewBookingType {
                name: body.name,
                description: body.description,
                duration_minutes: body.duration,
                location: body.location,
                is_active: body.is_active,
                use_business_hours: body.use_business_hours,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(bt)))
}

pub async fn update_booking_type(
    State(state): State<AppState>,
    staff: Staff,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<UpdateBookingTypeBody>, JsonRejection>,
) -> Result<Json<BookingType>, ApiError> {
    staff.require_owner()?;
    let id = path_param(id)?;
    let body = json_body(body)?;
    let bt = state
        .engine
        .update_booking_type(
            staff.0.workspace_id,
            id,
            BookingTypeUpdate {
                name: body.name,
                description: body.description,
                duration_minutes: body.duration,
                location: body.location,
                is_active: body.is_active,
            },
        )
        .await?;
    Ok(Json(bt))
}

pub async fn list_rules(
    State(state): State<AppState>,
    staff: Staff,
    id: Result<Path<Ulid>, PathRejection>,
) -> Result<Json<Vec<AvailabilityRule>>, ApiError> {
    let id = path_param(id)?;
    Ok(Json(state.engine.list_rules(staff.0.workspace_id, id).await?))
}

pub async fn add_rule(
    State(state): State<AppState>,
    staff: Staff,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<NewRuleBody>, JsonRejection>,
) -> Result<(StatusCode, Json<AvailabilityRule>), ApiError> {
    staff.require_owner()?;
    let id = path_param(id)?;
    let body = json_body(body)?;
    let rule = NewRule {
        day_of_week: body.day_of_week,
        start_time: parse_hhmm("startTime", &body.start_time)?,
        end_time: parse_hhmm("endTime", &body.end_time)?,
    };
    let rule = state.engine.add_rule(staff.0.workspace_id, id, rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn remove_rule(
    State(state): State<AppState>,
    staff: Staff,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    staff.require_owner()?;
    let (id, rule_id) = path_param(ids)?;
    state.engine.remove_rule(staff.0.workspace_id, id, rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_bookings(
    State(state): State<AppState>,
    staff: Staff,
    query: Result<Query<BookingListQuery>, QueryRejection>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let query = query_params(query)?;
    let filter = BookingFilter {
        from: query.from,
        until: query.until,
        statuses: parse_statuses(query.status.as_deref())?,
        limit: query.limit,
    };
    Ok(Json(state.engine.list_bookings(staff.0.workspace_id, filter).await?))
}

pub async fn upcoming(State(state): State<AppState>, staff: Staff) -> Result<Json<Vec<Booking>>, ApiError> {
    Ok(Json(state.engine.upcoming_bookings(staff.0.workspace_id).await?))
}

pub async fn today(State(state): State<AppState>, staff: Staff) -> Result<Json<Vec<Booking>>, ApiError> {
    Ok(Json(state.engine.todays_bookings(staff.0.workspace_id).await?))
}

pub async fn get_booking(
    State(state): State<AppState>,
    staff: Staff,
    id: Result<Path<Ulid>, PathRejection>,
) -> Result<Json<Booking>, ApiError> {
    let id = path_param(id)?;
    Ok(Json(state.engine.get_booking(staff.0.workspace_id, id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    staff: Staff,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> Result<Json<Booking>, ApiError> {
    let id = path_param(id)?;
    let body = json_body(body)?;
    let next: BookingStatus = body
        .status
        .parse()
        .map_err(|e: String| EngineError::validation("status", e))?;
    Ok(Json(state.engine.transition_status(staff.0.workspace_id, id, next).await?))
}
