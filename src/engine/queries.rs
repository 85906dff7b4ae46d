use chrono::{Duration, NaiveDate};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{covering_span, generate_slots, local_date, local_day_span};
use super::conflict::filter_conflicts;
use super::{Engine, EngineError};

impl Engine {
    /// Reservable slots of a booking type on a local calendar date.
    ///
    /// Read-only and lock-free: the booking snapshot may already be stale by
    /// the time the caller sees it. Commit re-checks, so staleness only ever
    /// turns into a `SlotConflict` later.
    pub async fn available_slots(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, EngineError> {
        let workspace = self.resolve_workspace(workspace_id).await?;
        let bt = self.resolve_active_booking_type(workspace_id, booking_type_id).await?;

        let now = self.now();
        let horizon = local_date(workspace.timezone, now) + Duration::days(MAX_BOOKING_HORIZON_DAYS);
        if date > horizon {
            return Err(EngineError::validation(
                "date",
                format!("must be within {MAX_BOOKING_HORIZON_DAYS} days"),
            ));
        }

        let rules = self.stores.rules.rules_for(bt.id).await?;
        let candidates = generate_slots(&bt, date, &rules, workspace.timezone, now);
        let Some(window) = covering_span(&candidates) else {
            metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
            return Ok(Vec::new());
        };

        let existing = self.stores.bookings.active_in_range(bt.id, &window).await?;
        let free = filter_conflicts(candidates, &existing);
        debug!(
            booking_type = %bt.id,
            %date,
            existing = existing.len(),
            free = free.len(),
            "computed availability"
        );
        metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
        metrics::histogram!(crate::observability::SLOTS_RETURNED).record(free.len() as f64);
        Ok(free.into_iter().map(Slot::from_span).collect())
    }

    pub async fn list_booking_types(&self, workspace_id: Ulid) -> Result<Vec<BookingType>, EngineError> {
        self.stores.catalog.booking_types(workspace_id).await
    }

    /// Active booking types, for the public booking page.
    pub async fn list_public_booking_types(&self, workspace_id: Ulid) -> Result<Vec<BookingType>, EngineError> {
        self.resolve_workspace(workspace_id).await?;
        let mut types = self.stores.catalog.booking_types(workspace_id).await?;
        types.retain(|bt| bt.is_active);
        Ok(types)
    }

    pub async fn list_rules(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
    ) -> Result<Vec<AvailabilityRule>, EngineError> {
        let bt = self.resolve_booking_type(workspace_id, booking_type_id).await?;
        let mut rules = self.stores.rules.rules_for(bt.id).await?;
        rules.sort_by_key(|r| (r.day_of_week, r.start_time, r.end_time));
        Ok(rules)
    }

    pub async fn get_booking(&self, workspace_id: Ulid, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.stores
            .bookings
            .booking(booking_id)
            .await?
            .filter(|b| b.workspace_id == workspace_id)
            .ok_or_else(|| EngineError::not_found("booking", booking_id))
    }

    pub async fn list_bookings(
        &self,
        workspace_id: Ulid,
        mut filter: BookingFilter,
    ) -> Result<Vec<Booking>, EngineError> {
        let limit = filter.limit.unwrap_or(MAX_BOOKINGS_PER_PAGE).min(MAX_BOOKINGS_PER_PAGE);
        filter.limit = Some(limit);
        self.stores.bookings.bookings(workspace_id, &filter).await
    }

    /// Pending and confirmed bookings starting from now on.
    pub async fn upcoming_bookings(&self, workspace_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        self.resolve_workspace(workspace_id).await?;
        let filter = BookingFilter {
            from: Some(self.now()),
            statuses: vec![BookingStatus::Pending, BookingStatus::Confirmed],
            ..Default::default()
        };
        self.list_bookings(workspace_id, filter).await
    }

    /// Every booking starting on the workspace's current local date.
    pub async fn todays_bookings(&self, workspace_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let workspace = self.resolve_workspace(workspace_id).await?;
        let today = local_day_span(workspace.timezone, local_date(workspace.timezone, self.now()));
        let filter = BookingFilter {
            from: Some(today.start),
            until: Some(today.end),
            ..Default::default()
        };
        self.list_bookings(workspace_id, filter).await
    }
}
