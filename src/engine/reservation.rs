use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{generate_slots, local_date};
use super::reference::generate_reference_code;
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub workspace_id: Ulid,
    pub booking_type_id: Ulid,
    pub contact_id: Ulid,
    pub start: DateTime<Utc>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Engine {
    /// Commit a booking for the slot starting at `request.start`.
    ///
    /// The slot is re-derived from the current rules and the end time is
    /// computed from the booking type, never taken from the caller. The
    /// conflict check and the insert happen as one step inside the store, so
    /// of two simultaneous requests for the same interval exactly one wins;
    /// the other gets `SlotConflict` and should re-fetch availability.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.reserve_inner(request).await;
        metrics::histogram!(crate::observability::RESERVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            crate::observability::RESERVATIONS_TOTAL,
            "outcome" => crate::observability::reservation_outcome(&result)
        )
        .increment(1);
        result
    }

    async fn reserve_inner(&self, request: ReservationRequest) -> Result<Booking, EngineError> {
        let notes = normalize_notes(request.notes)?;
        let metadata = normalize_metadata(request.metadata)?;

        let workspace = self.resolve_workspace(request.workspace_id).await?;
        let bt = self
            .resolve_active_booking_type(workspace.id, request.booking_type_id)
            .await?;
        self.stores
            .contacts
            .contact(request.contact_id)
            .await?
            .filter(|c| c.workspace_id == workspace.id)
            .ok_or_else(|| EngineError::not_found("contact", request.contact_id))?;

        let rules = self.stores.rules.rules_for(bt.id).await?;
        let now = self.now();
        let date = local_date(workspace.timezone, request.start);
        let span = generate_slots(&bt, date, &rules, workspace.timezone, now)
            .into_iter()
            .find(|slot| slot.start == request.start)
            .ok_or_else(|| {
                EngineError::validation("startTime", "does not match an available slot of this booking type")
            })?;

        let status = BookingStatus::initial(workspace.auto_confirm);
        for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
            let reference_code = generate_reference_code(&mut rand::thread_rng());
            let booking = Booking {
                id: Ulid::new(),
                workspace_id: workspace.id,
                booking_type_id: bt.id,
                contact_id: request.contact_id,
                start_time: span.start,
                end_time: span.end,
                status,
                reference_code,
                notes: notes.clone(),
                metadata: metadata.clone(),
                created_at: now,
                updated_at: now,
            };

            match self.stores.bookings.insert_if_free(&booking).await {
                Ok(()) => {
                    info!(
                        booking = %booking.id,
                        reference = %booking.reference_code,
                        booking_type = %bt.id,
                        start = %booking.start_time,
                        %status,
                        "booking committed"
                    );
                    self.notify.send(&BookingEvent::Created(booking.clone()));
                    return Ok(booking);
                }
                Err(EngineError::ReferenceCollision(code)) => {
                    warn!(attempt, %code, "reference code collision, regenerating");
                    metrics::counter!(
                        crate::observability::COMMIT_RETRIES_TOTAL,
                        "reason" => "reference_collision"
                    )
                    .increment(1);
                }
                Err(e @ EngineError::SlotConflict { .. }) => {
                    warn!(booking_type = %bt.id, start = %span.start, "slot taken at commit time");
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::Internal(format!(
            "no unique reference code after {MAX_REFERENCE_ATTEMPTS} attempts"
        )))
    }
}

fn normalize_notes(notes: Option<String>) -> Result<Option<String>, EngineError> {
    let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::validation("notes", format!("at most {MAX_NOTES_LEN} bytes")));
    }
    Ok(notes)
}

fn normalize_metadata(metadata: Option<serde_json::Value>) -> Result<serde_json::Value, EngineError> {
    match metadata {
        None | Some(serde_json::Value::Null) => Ok(serde_json::json!({})),
        Some(value @ serde_json::Value::Object(_)) => {
            if value.to_string().len() > MAX_METADATA_BYTES {
                return Err(EngineError::validation(
                    "metadata",
                    format!("at most {MAX_METADATA_BYTES} bytes"),
                ));
            }
            Ok(value)
        }
        Some(_) => Err(EngineError::validation("metadata", "must be a JSON object")),
    }
}
