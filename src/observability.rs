use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::model::Booking;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotbook_http_requests_total";

/// Counter: reservation attempts. Labels: outcome (committed, conflict, rejected, error).
pub const RESERVATIONS_TOTAL: &str = "slotbook_reservations_total";

/// Histogram: end-to-end reserve latency in seconds, including retries.
pub const RESERVE_DURATION_SECONDS: &str = "slotbook_reserve_duration_seconds";

/// Counter: commit attempts redone. Labels: reason (reference_collision, serialization).
pub const COMMIT_RETRIES_TOTAL: &str = "slotbook_commit_retries_total";

/// Counter: applied status transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "slotbook_status_transitions_total";

/// Counter: transitions refused by the lifecycle table or a lost race.
pub const STATUS_TRANSITIONS_REJECTED_TOTAL: &str = "slotbook_status_transitions_rejected_total";

/// Counter: availability listings served.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "slotbook_availability_queries_total";

/// Histogram: free slots returned per availability listing.
pub const SLOTS_RETURNED: &str = "slotbook_slots_returned";

/// Counter: contacts created by the public gateway.
pub const CONTACTS_CREATED_TOTAL: &str = "slotbook_contacts_created_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: requests refused for a missing or unknown bearer token.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a reservation result.
pub fn reservation_outcome(result: &Result<Booking, EngineError>) -> &'static str {
    match result {
        Ok(_) => "committed",
        Err(EngineError::SlotConflict { .. }) => "conflict",
        Err(
            EngineError::Validation { .. }
            | EngineError::NotFound { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::LimitExceeded(_),
        ) => "rejected",
        Err(EngineError::ReferenceCollision(_) | EngineError::Internal(_)) => "error",
    }
}
