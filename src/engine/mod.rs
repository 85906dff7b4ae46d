mod availability;
mod conflict;
mod error;
mod gateway;
mod lifecycle;
mod mutations;
mod queries;
mod reference;
mod reservation;
#[cfg(test)]
mod tests;

pub use availability::{covering_span, day_of_week, generate_slots, local_date, local_day_span};
pub use conflict::{filter_conflicts, merge_overlapping};
pub(crate) use conflict::check_no_conflict;
pub use error::EngineError;
pub use gateway::PublicBookingRequest;
pub use lifecycle::check_transition;
pub use mutations::{BookingTypeUpdate, NewBookingType, NewRule};
pub use reference::{generate_reference_code, is_reference_code};
pub use reservation::ReservationRequest;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::Stores;

/// Source of "now". Swapped out in tests to pin the calendar.
pub type Clock = fn() -> DateTime<Utc>;

fn system_clock() -> DateTime<Utc> {
    Utc::now()
}

/// Scheduling engine: slot listing, reservation commit, and status lifecycle
/// for every workspace, on top of injected stores.
pub struct Engine {
    pub(super) stores: Stores,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Clock,
}

impl Engine {
    pub fn new(stores: Stores, notify: Arc<NotifyHub>) -> Self {
        Self {
            stores,
            notify,
            clock: system_clock,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub(super) async fn resolve_workspace(&self, workspace_id: Ulid) -> Result<Workspace, EngineError> {
        self.stores
            .workspaces
            .workspace(workspace_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workspace", workspace_id))
    }

    /// Booking type lookup scoped to a workspace; a type of another tenant is
    /// reported as missing, not forbidden.
    pub(super) async fn resolve_booking_type(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
    ) -> Result<BookingType, EngineError> {
        self.stores
            .catalog
            .booking_type(booking_type_id)
            .await?
            .filter(|bt| bt.workspace_id == workspace_id)
            .ok_or_else(|| EngineError::not_found("booking type", booking_type_id))
    }

    pub(super) async fn resolve_active_booking_type(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
    ) -> Result<BookingType, EngineError> {
        let bt = self.resolve_booking_type(workspace_id, booking_type_id).await?;
        if !bt.is_active {
            return Err(EngineError::validation("bookingTypeId", "booking type is not active"));
        }
        Ok(bt)
    }
}
