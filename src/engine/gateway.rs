use chrono::{DateTime, Utc};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::reservation::ReservationRequest;
use super::{Engine, EngineError};

/// An unauthenticated booking submission from the public booking page.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicBookingRequest {
    pub booking_type_id: Ulid,
    pub start_time: DateTime<Utc>,
    pub contact: ContactDetails,
    pub notes: Option<String>,
}

impl Engine {
    /// Resolve the caller to a contact, then hand the slot to `reserve`.
    /// Conflict handling lives entirely in the reservation path.
    pub async fn submit_public_booking(
        &self,
        workspace_id: Ulid,
        request: PublicBookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let details = normalize_contact(request.contact)?;
        // Fail fast on unknown tenants and types before a contact is written.
        self.resolve_workspace(workspace_id).await?;
        let bt = self
            .resolve_active_booking_type(workspace_id, request.booking_type_id)
            .await?;

        let contact = self.find_or_create_contact(workspace_id, &details).await?;
        let booking = self
            .reserve(ReservationRequest {
                workspace_id,
                booking_type_id: bt.id,
                contact_id: contact.id,
                start: request.start_time,
                notes: request.notes,
                metadata: Some(serde_json::json!({ "source": "public" })),
            })
            .await?;

        Ok(BookingConfirmation {
            contact: ContactSummary {
                display_name: contact.display_name(),
                email: contact.email.clone(),
            },
            booking_type: BookingTypeSummary {
                name: bt.name,
                duration: bt.duration_minutes,
                location: bt.location,
            },
            start_time: booking.start_time,
            end_time: booking.end_time,
            reference_code: booking.reference_code,
            status: booking.status,
        })
    }

    /// Upsert-by-email. With an email, the workspace's existing contact for it
    /// is reused; non-empty incoming name and phone overwrite what is stored,
    /// empty ones never clear it. Without an email a new contact is created
    /// every time.
    pub async fn find_or_create_contact(
        &self,
        workspace_id: Ulid,
        details: &ContactDetails,
    ) -> Result<Contact, EngineError> {
        let now = self.now();
        if let Some(email) = details.email.as_deref()
            && let Some(existing) = self.stores.contacts.find_by_email(workspace_id, email).await?
        {
            return self.refresh_contact(existing, details).await;
        }

        let candidate = Contact {
            id: Ulid::new(),
            workspace_id,
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            email: details.email.clone(),
            phone: details.phone.clone(),
            created_at: now,
            updated_at: now,
        };
        let stored = self.stores.contacts.insert_or_get(&candidate).await?;
        if stored.id == candidate.id {
            info!(contact = %stored.id, %workspace_id, "contact created");
            metrics::counter!(crate::observability::CONTACTS_CREATED_TOTAL).increment(1);
            Ok(stored)
        } else {
            // Lost a race with a concurrent submission for the same email.
            self.refresh_contact(stored, details).await
        }
    }

    async fn refresh_contact(&self, existing: Contact, details: &ContactDetails) -> Result<Contact, EngineError> {
        let merged = merge_contact(&existing, details);
        if merged == existing {
            return Ok(existing);
        }
        let merged = Contact { updated_at: self.now(), ..merged };
        self.stores.contacts.update_contact(&merged).await?;
        Ok(merged)
    }
}

fn merge_contact(existing: &Contact, details: &ContactDetails) -> Contact {
    let mut merged = existing.clone();
    if !details.first_name.is_empty() {
        merged.first_name = details.first_name.clone();
    }
    if !details.last_name.is_empty() {
        merged.last_name = details.last_name.clone();
    }
    if let Some(phone) = &details.phone {
        merged.phone = Some(phone.clone());
    }
    merged
}

/// Trim everything, lower-case the email, drop empty optionals, and check
/// that the caller left some way to reach them.
fn normalize_contact(details: ContactDetails) -> Result<ContactDetails, EngineError> {
    let first_name = details.first_name.trim().to_string();
    let last_name = details.last_name.trim().to_string();
    let email = details
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let phone = details
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    if first_name.is_empty() {
        return Err(EngineError::validation("firstName", "is required"));
    }
    for (field, value) in [
        ("firstName", Some(&first_name)),
        ("lastName", Some(&last_name)),
        ("email", email.as_ref()),
        ("phone", phone.as_ref()),
    ] {
        if value.is_some_and(|v| v.len() > MAX_CONTACT_FIELD_LEN) {
            return Err(EngineError::validation(field, format!("at most {MAX_CONTACT_FIELD_LEN} bytes")));
        }
    }
    if email.is_none() && phone.is_none() {
        return Err(EngineError::validation("email", "an email or phone number is required"));
    }
    if let Some(e) = &email
        && !looks_like_email(e)
    {
        return Err(EngineError::validation("email", "is not a valid email address"));
    }

    Ok(ContactDetails { first_name, last_name, email, phone })
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.contains(char::is_whitespace)
}
