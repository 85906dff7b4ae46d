use chrono::{NaiveTime, Weekday};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Weekdays seeded from the workspace's business hours.
const BUSINESS_DAYS: [Weekday; 5] = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBookingType {
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub location: Option<String>,
    /// Defaults to active.
    pub is_active: Option<bool>,
    /// Seed Monday–Friday rules from the workspace's business hours.
    pub use_business_hours: bool,
}

/// Partial update; `None` leaves a field as it is. An empty description or
/// location clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingTypeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<u32>,
    pub location: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewRule {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Engine {
    pub async fn create_booking_type(
        &self,
        workspace_id: Ulid,
        input: NewBookingType,
    ) -> Result<BookingType, EngineError> {
        let workspace = self.resolve_workspace(workspace_id).await?;
        let existing = self.stores.catalog.booking_types(workspace_id).await?;
        if existing.len() >= MAX_BOOKING_TYPES_PER_WORKSPACE {
            return Err(EngineError::LimitExceeded("too many booking types in workspace"));
        }

        let bt = BookingType {
            id: Ulid::new(),
            workspace_id,
            name: validate_name(&input.name)?,
            description: validate_optional("description", input.description, MAX_DESCRIPTION_LEN)?,
            duration_minutes: validate_duration(input.duration_minutes)?,
            location: validate_optional("location", input.location, MAX_LOCATION_LEN)?,
            is_active: input.is_active.unwrap_or(true),
            created_at: self.now(),
        };
        self.stores.catalog.create_booking_type(&bt).await?;

        if input.use_business_hours {
            let hours = workspace.business_hours;
            for day in BUSINESS_DAYS {
                let rule = NewRule {
                    day_of_week: day.num_days_from_sunday() as u8,
                    start_time: hours.start,
                    end_time: hours.end,
                };
                self.stores.rules.add_rule(&build_rule(bt.id, rule)?).await?;
            }
        }

        info!(booking_type = %bt.id, %workspace_id, name = %bt.name, "booking type created");
        Ok(bt)
    }

    /// Duration changes only affect slots generated from now on; committed
    /// bookings keep the end time they were created with.
    pub async fn update_booking_type(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
        update: BookingTypeUpdate,
    ) -> Result<BookingType, EngineError> {
        let mut bt = self.resolve_booking_type(workspace_id, booking_type_id).await?;
        if let Some(name) = update.name {
            bt.name = validate_name(&name)?;
        }
        if let Some(description) = update.description {
            bt.description = validate_optional("description", Some(description), MAX_DESCRIPTION_LEN)?;
        }
        if let Some(location) = update.location {
            bt.location = validate_optional("location", Some(location), MAX_LOCATION_LEN)?;
        }
        if let Some(minutes) = update.duration_minutes {
            bt.duration_minutes = validate_duration(minutes)?;
        }
        if let Some(active) = update.is_active {
            bt.is_active = active;
        }

        self.stores.catalog.update_booking_type(&bt).await?;
        info!(booking_type = %bt.id, active = bt.is_active, duration = bt.duration_minutes, "booking type updated");
        Ok(bt)
    }

    pub async fn add_rule(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
        input: NewRule,
    ) -> Result<AvailabilityRule, EngineError> {
        let bt = self.resolve_booking_type(workspace_id, booking_type_id).await?;
        let rule = build_rule(bt.id, input)?;
        if self.stores.rules.rules_for(bt.id).await?.len() >= MAX_RULES_PER_BOOKING_TYPE {
            return Err(EngineError::LimitExceeded("too many availability rules on booking type"));
        }
        self.stores.rules.add_rule(&rule).await?;
        info!(
            rule = %rule.id,
            booking_type = %bt.id,
            day = rule.day_of_week,
            start = %rule.start_time,
            end = %rule.end_time,
            "availability rule added"
        );
        Ok(rule)
    }

    pub async fn remove_rule(
        &self,
        workspace_id: Ulid,
        booking_type_id: Ulid,
        rule_id: Ulid,
    ) -> Result<(), EngineError> {
        let bt = self.resolve_booking_type(workspace_id, booking_type_id).await?;
        if !self.stores.rules.remove_rule(bt.id, rule_id).await? {
            return Err(EngineError::not_found("availability rule", rule_id));
        }
        info!(rule = %rule_id, booking_type = %bt.id, "availability rule removed");
        Ok(())
    }
}

fn build_rule(booking_type_id: Ulid, input: NewRule) -> Result<AvailabilityRule, EngineError> {
    if input.day_of_week > 6 {
        return Err(EngineError::validation("dayOfWeek", "must be between 0 (Sunday) and 6"));
    }
    if input.start_time >= input.end_time {
        return Err(EngineError::validation("endTime", "must be after startTime"));
    }
    Ok(AvailabilityRule {
        id: Ulid::new(),
        booking_type_id,
        day_of_week: input.day_of_week,
        start_time: input.start_time,
        end_time: input.end_time,
    })
}

fn validate_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("name", "is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::validation("name", format!("at most {MAX_NAME_LEN} bytes")));
    }
    Ok(name.to_string())
}

fn validate_optional(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<Option<String>, EngineError> {
    let value = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    if value.as_ref().is_some_and(|v| v.len() > max) {
        return Err(EngineError::validation(field, format!("at most {max} bytes")));
    }
    Ok(value)
}

fn validate_duration(minutes: u32) -> Result<u32, EngineError> {
    if minutes == 0 || minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::validation(
            "duration",
            format!("must be between 1 and {MAX_DURATION_MINUTES} minutes"),
        ));
    }
    Ok(minutes)
}
