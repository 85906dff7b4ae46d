use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::PublicBookingRequest;
use crate::model::*;

use super::{json_body, path_param, query_params, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub booking_type_id: Ulid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicBookingBody {
    pub booking_type_id: Ulid,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

/// Booking type as shown on the public booking page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicBookingType {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub duration: u32,
    pub location: Option<String>,
}

impl From<BookingType> for PublicBookingType {
    fn from(bt: BookingType) -> Self {
        Self {
            id: bt.id,
            name: bt.name,
            description: bt.description,
            duration: bt.duration_minutes,
            location: bt.location,
        }
    }
}

pub async fn booking_types(
    State(state): State<AppState>,
    workspace_id: Result<Path<Ulid>, PathRejection>,
) -> Result<Json<Vec<PublicBookingType>>, ApiError> {
    let workspace_id = path_param(workspace_id)?;
    let types = state.engine.list_public_booking_types(workspace_id).await?;
    Ok(Json(types.into_iter().map(PublicBookingType::from).collect()))
}

pub async fn availability(
    State(state): State<AppState>,
    workspace_id: Result<Path<Ulid>, PathRejection>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let workspace_id = path_param(workspace_id)?;
    let query = query_params(query)?;
    let slots = state
        .engine
        .available_slots(workspace_id, query.booking_type_id, query.date)
        .await?;
    Ok(Json(slots))
}

pub async fn submit(
    State(state): State<AppState>,
    workspace_id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<PublicBookingBody>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingConfirmation>), ApiError> {
    let workspace_id = path_param(workspace_id)?;
    let body = json_body(body)?;
    let request = PublicBookingRequest {
        booking_type_id: body.booking_type_id,
        start_time: body.start_time,
        contact: ContactDetails {
            first_name: body.first_name,
            last_name: body.last_name,
            email: body.email,
            phone: body.phone,
        },
        notes: body.notes,
    };
    let confirmation = state.engine.submit_public_booking(workspace_id, request).await?;
    Ok((StatusCode::CREATED, Json(confirmation)))
}
