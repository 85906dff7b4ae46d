use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl BookingStatus {
    /// Transition table. Terminal states have no exits, and nothing ever
    /// leads back out of CANCELLED or NO_SHOW.
    pub const fn allowed_transitions(self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[
                BookingStatus::Confirmed,
                BookingStatus::Cancelled,
                BookingStatus::NoShow,
            ],
            BookingStatus::Confirmed => &[
                BookingStatus::Completed,
                BookingStatus::Cancelled,
                BookingStatus::NoShow,
            ],
            BookingStatus::Completed | BookingStatus::NoShow | BookingStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub const fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether a booking in this state occupies its interval.
    pub const fn blocks_schedule(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Completed
        )
    }

    /// Status a freshly committed booking starts in.
    pub const fn initial(auto_confirm: bool) -> BookingStatus {
        if auto_confirm {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        }
    }
}

pub fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

impl Engine {
    /// Move a booking of `workspace_id` to `next`. The write only lands if
    /// nobody changed the status since it was read; the loser of such a race
    /// gets `InvalidTransition`.
    pub async fn transition_status(
        &self,
        workspace_id: Ulid,
        booking_id: Ulid,
        next: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let current = self
            .stores
            .bookings
            .booking(booking_id)
            .await?
            .filter(|b| b.workspace_id == workspace_id)
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;

        let from = current.status;
        if let Err(e) = check_transition(from, next) {
            metrics::counter!(crate::observability::STATUS_TRANSITIONS_REJECTED_TOTAL).increment(1);
            return Err(e);
        }

        let updated = match self
            .stores
            .bookings
            .update_status(booking_id, from, next, (self.clock)())
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                if matches!(e, EngineError::InvalidTransition { .. }) {
                    metrics::counter!(crate::observability::STATUS_TRANSITIONS_REJECTED_TOTAL).increment(1);
                }
                return Err(e);
            }
        };

        info!(
            booking = %booking_id,
            reference = %updated.reference_code,
            %from,
            to = %next,
            "booking status changed"
        );
        metrics::counter!(crate::observability::STATUS_TRANSITIONS_TOTAL, "to" => next.as_str())
            .increment(1);
        self.notify.send(&BookingEvent::StatusChanged {
            booking: updated.clone(),
            from,
        });
        Ok(updated)
    }
}
