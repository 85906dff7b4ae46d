use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

use super::{AvailabilityRuleStore, BookingRepository, BookingTypeCatalog, ContactDirectory, WorkspaceDirectory};

/// Every booking of one booking type, sorted by `start_time`. The write lock
/// is the commit critical section for that booking type.
#[derive(Debug)]
pub struct Schedule {
    pub booking_type_id: Ulid,
    pub bookings: Vec<Booking>,
}

pub type SharedSchedule = Arc<RwLock<Schedule>>;

impl Schedule {
    pub fn new(booking_type_id: Ulid) -> Self {
        Self { booking_type_id, bookings: Vec::new() }
    }

    /// Insert maintaining sort order by start time.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.start_time <= booking.start_time);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose interval overlaps `window`, whatever their status.
    pub fn overlapping(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after window.end.
        let right_bound = self.bookings.partition_point(|b| b.start_time < window.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end_time > window.start)
    }
}

/// Process-local backend. Lost on restart; used when no database is
/// configured and throughout the tests.
pub struct MemoryStore {
    workspaces: DashMap<Ulid, Workspace>,
    booking_types: DashMap<Ulid, BookingType>,
    rules: DashMap<Ulid, Vec<AvailabilityRule>>,
    schedules: DashMap<Ulid, SharedSchedule>,
    /// booking id -> booking type id, to find the owning schedule.
    booking_index: DashMap<Ulid, Ulid>,
    /// (workspace, reference code) -> booking id.
    references: DashMap<(Ulid, String), Ulid>,
    contacts: DashMap<Ulid, Contact>,
    /// (workspace, lower-cased email) -> contact id.
    contact_emails: DashMap<(Ulid, String), Ulid>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            workspaces: DashMap::new(),
            booking_types: DashMap::new(),
            rules: DashMap::new(),
            schedules: DashMap::new(),
            booking_index: DashMap::new(),
            references: DashMap::new(),
            contacts: DashMap::new(),
            contact_emails: DashMap::new(),
        }
    }

    fn schedule(&self, booking_type_id: Ulid) -> Option<SharedSchedule> {
        self.schedules.get(&booking_type_id).map(|e| e.value().clone())
    }

    fn schedule_or_create(&self, booking_type_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(booking_type_id)
            .or_insert_with(|| Arc::new(RwLock::new(Schedule::new(booking_type_id))))
            .value()
            .clone()
    }

    fn schedule_of_booking(&self, booking_id: Ulid) -> Option<SharedSchedule> {
        let booking_type_id = *self.booking_index.get(&booking_id)?.value();
        self.schedule(booking_type_id)
    }

    pub fn booking_count(&self) -> usize {
        self.booking_index.len()
    }
}

#[async_trait]
impl WorkspaceDirectory for MemoryStore {
    async fn workspace(&self, id: Ulid) -> Result<Option<Workspace>, EngineError> {
        Ok(self.workspaces.get(&id).map(|e| e.value().clone()))
    }

    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), EngineError> {
        self.workspaces.insert(workspace.id, workspace.clone());
        Ok(())
    }
}

#[async_trait]
impl BookingTypeCatalog for MemoryStore {
    async fn create_booking_type(&self, booking_type: &BookingType) -> Result<(), EngineError> {
        match self.booking_types.entry(booking_type.id) {
            Entry::Occupied(_) => Err(EngineError::Internal(format!(
                "duplicate booking type id {}",
                booking_type.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(booking_type.clone());
                Ok(())
            }
        }
    }

    async fn update_booking_type(&self, booking_type: &BookingType) -> Result<(), EngineError> {
        let mut entry = self
            .booking_types
            .get_mut(&booking_type.id)
            .ok_or_else(|| EngineError::not_found("booking type", booking_type.id))?;
        *entry = booking_type.clone();
        Ok(())
    }

    async fn booking_type(&self, id: Ulid) -> Result<Option<BookingType>, EngineError> {
        Ok(self.booking_types.get(&id).map(|e| e.value().clone()))
    }

    async fn booking_types(&self, workspace_id: Ulid) -> Result<Vec<BookingType>, EngineError> {
        let mut types: Vec<BookingType> = self
            .booking_types
            .iter()
            .filter(|e| e.workspace_id == workspace_id)
            .map(|e| e.value().clone())
            .collect();
        types.sort_by_key(|bt| (bt.created_at, bt.id));
        Ok(types)
    }
}

#[async_trait]
impl AvailabilityRuleStore for MemoryStore {
    async fn add_rule(&self, rule: &AvailabilityRule) -> Result<(), EngineError> {
        self.rules.entry(rule.booking_type_id).or_default().push(rule.clone());
        Ok(())
    }

    async fn remove_rule(&self, booking_type_id: Ulid, rule_id: Ulid) -> Result<bool, EngineError> {
        let Some(mut rules) = self.rules.get_mut(&booking_type_id) else {
            return Ok(false);
        };
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        Ok(rules.len() != before)
    }

    async fn rules_for(&self, booking_type_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        Ok(self
            .rules
            .get(&booking_type_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        let Some(schedule) = self.schedule_of_booking(id) else {
            return Ok(None);
        };
        let guard = schedule.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn bookings(&self, workspace_id: Ulid, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        let type_ids: Vec<Ulid> = self
            .booking_types
            .iter()
            .filter(|e| e.workspace_id == workspace_id)
            .map(|e| *e.key())
            .collect();

        let mut out = Vec::new();
        for type_id in type_ids {
            let Some(schedule) = self.schedule(type_id) else {
                continue;
            };
            let guard = schedule.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by_key(|b| (b.start_time, b.id));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn active_in_range(&self, booking_type_id: Ulid, window: &Span) -> Result<Vec<Booking>, EngineError> {
        let Some(schedule) = self.schedule(booking_type_id) else {
            return Ok(Vec::new());
        };
        let guard = schedule.read().await;
        Ok(guard
            .overlapping(window)
            .filter(|b| b.status.blocks_schedule())
            .cloned()
            .collect())
    }

    async fn insert_if_free(&self, booking: &Booking) -> Result<(), EngineError> {
        let schedule = self.schedule_or_create(booking.booking_type_id);
        let mut guard = schedule.write().await;

        let span = booking.span();
        crate::engine::check_no_conflict(guard.overlapping(&span), &span)?;

        match self
            .references
            .entry((booking.workspace_id, booking.reference_code.clone()))
        {
            Entry::Occupied(_) => return Err(EngineError::ReferenceCollision(booking.reference_code.clone())),
            Entry::Vacant(slot) => {
                slot.insert(booking.id);
            }
        }

        self.booking_index.insert(booking.id, booking.booking_type_id);
        guard.insert(booking.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        let schedule = self
            .schedule_of_booking(id)
            .ok_or_else(|| EngineError::not_found("booking", id))?;
        let mut guard = schedule.write().await;
        let booking = guard
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("booking", id))?;
        if booking.status != expected {
            return Err(EngineError::InvalidTransition { from: booking.status, to: next });
        }
        booking.status = next;
        booking.updated_at = at;
        Ok(booking.clone())
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn contact(&self, id: Ulid) -> Result<Option<Contact>, EngineError> {
        Ok(self.contacts.get(&id).map(|e| e.value().clone()))
    }

    async fn find_by_email(&self, workspace_id: Ulid, email: &str) -> Result<Option<Contact>, EngineError> {
        let Some(id) = self
            .contact_emails
            .get(&(workspace_id, email.to_lowercase()))
            .map(|e| *e.value())
        else {
            return Ok(None);
        };
        Ok(self.contacts.get(&id).map(|e| e.value().clone()))
    }

    async fn insert_or_get(&self, contact: &Contact) -> Result<Contact, EngineError> {
        if let Some(email) = &contact.email {
            match self.contact_emails.entry((contact.workspace_id, email.to_lowercase())) {
                Entry::Occupied(existing) => {
                    let id = *existing.get();
                    drop(existing);
                    return self
                        .contacts
                        .get(&id)
                        .map(|e| e.value().clone())
                        .ok_or_else(|| EngineError::Internal(format!("dangling email index for contact {id}")));
                }
                Entry::Vacant(slot) => {
                    // Insert the contact while the email entry is still locked
                    // so no reader sees an index entry without its contact.
                    self.contacts.insert(contact.id, contact.clone());
                    slot.insert(contact.id);
                    return Ok(contact.clone());
                }
            }
        }
        self.contacts.insert(contact.id, contact.clone());
        Ok(contact.clone())
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), EngineError> {
        let mut entry = self
            .contacts
            .get_mut(&contact.id)
            .ok_or_else(|| EngineError::not_found("contact", contact.id))?;
        *entry = contact.clone();
        Ok(())
    }
}
