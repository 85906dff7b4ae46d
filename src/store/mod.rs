//! Storage seams. The engine only talks to these traits; `memory` keeps
//! everything in process, `postgres` persists to a relational database.

mod memory;
mod postgres;

pub use memory::{MemoryStore, Schedule, SharedSchedule};
pub use postgres::PgStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Read access to tenants. Workspaces are created by the signup flow, not here.
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    async fn workspace(&self, id: Ulid) -> Result<Option<Workspace>, EngineError>;

    /// Insert or replace. Used by provisioning and tests.
    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), EngineError>;
}

#[async_trait]
pub trait BookingTypeCatalog: Send + Sync {
    async fn create_booking_type(&self, booking_type: &BookingType) -> Result<(), EngineError>;

    async fn update_booking_type(&self, booking_type: &BookingType) -> Result<(), EngineError>;

    async fn booking_type(&self, id: Ulid) -> Result<Option<BookingType>, EngineError>;

    /// All booking types of a workspace, oldest first.
    async fn booking_types(&self, workspace_id: Ulid) -> Result<Vec<BookingType>, EngineError>;
}

#[async_trait]
pub trait AvailabilityRuleStore: Send + Sync {
    async fn add_rule(&self, rule: &AvailabilityRule) -> Result<(), EngineError>;

    /// Returns false when no such rule exists on that booking type.
    async fn remove_rule(&self, booking_type_id: Ulid, rule_id: Ulid) -> Result<bool, EngineError>;

    async fn rules_for(&self, booking_type_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError>;

    /// Bookings of a workspace matching `filter`, ordered by start time.
    async fn bookings(&self, workspace_id: Ulid, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError>;

    /// Bookings of one booking type that overlap `window` and still occupy
    /// their interval (PENDING, CONFIRMED, COMPLETED).
    async fn active_in_range(&self, booking_type_id: Ulid, window: &Span) -> Result<Vec<Booking>, EngineError>;

    /// Check-and-insert as one indivisible step: fails with `SlotConflict`
    /// if an active booking of the same type overlaps, with
    /// `ReferenceCollision` if the workspace already uses the reference code.
    async fn insert_if_free(&self, booking: &Booking) -> Result<(), EngineError>;

    /// Set `next` only if the stored status is still `expected`; otherwise
    /// `InvalidTransition` from whatever the stored status is.
    async fn update_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Booking, EngineError>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contact(&self, id: Ulid) -> Result<Option<Contact>, EngineError>;

    async fn find_by_email(&self, workspace_id: Ulid, email: &str) -> Result<Option<Contact>, EngineError>;

    /// Insert `contact` unless another contact of the workspace already owns
    /// its email, in which case that one is returned untouched.
    async fn insert_or_get(&self, contact: &Contact) -> Result<Contact, EngineError>;

    async fn update_contact(&self, contact: &Contact) -> Result<(), EngineError>;
}

/// The set of stores an engine is wired with.
#[derive(Clone)]
pub struct Stores {
    pub workspaces: Arc<dyn WorkspaceDirectory>,
    pub catalog: Arc<dyn BookingTypeCatalog>,
    pub rules: Arc<dyn AvailabilityRuleStore>,
    pub bookings: Arc<dyn BookingRepository>,
    pub contacts: Arc<dyn ContactDirectory>,
}

impl Stores {
    /// Wire every seam to a single backend.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: WorkspaceDirectory
            + BookingTypeCatalog
            + AvailabilityRuleStore
            + BookingRepository
            + ContactDirectory
            + 'static,
    {
        Self {
            workspaces: backend.clone(),
            catalog: backend.clone(),
            rules: backend.clone(),
            bookings: backend.clone(),
            contacts: backend,
        }
    }
}
