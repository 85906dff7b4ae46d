use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::warn;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_COMMIT_RETRIES;
use crate::model::*;

use super::{AvailabilityRuleStore, BookingRepository, BookingTypeCatalog, ContactDirectory, WorkspaceDirectory};

const SERIALIZATION_FAILURE: &str = "40001";
const UNIQUE_VIOLATION: &str = "23505";
const EXCLUSION_VIOLATION: &str = "23P01";
const REFERENCE_CONSTRAINT: &str = "bookings_workspace_reference";

const WORKSPACE_COLUMNS: &str = "id, name, timezone, business_start, business_end, auto_confirm";
const BOOKING_TYPE_COLUMNS: &str =
    "id, workspace_id, name, description, duration, location, is_active, created_at";
const RULE_COLUMNS: &str = "id, booking_type_id, day_of_week, start_time, end_time";
const CONTACT_COLUMNS: &str =
    "id, workspace_id, first_name, last_name, email, phone, created_at, updated_at";
const BOOKING_COLUMNS: &str = "id, workspace_id, booking_type_id, contact_id, start_time, end_time, \
     status, reference_code, notes, metadata, created_at, updated_at";

/// Relational backend. Ids are stored as their 26-character ULID text.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// One SERIALIZABLE attempt: overlap check, then insert. `Ok(Some(id))`
    /// names the booking already holding the interval.
    async fn insert_once(&self, booking: &Booking) -> Result<Option<String>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let overlap: Option<String> = sqlx::query_scalar(
            "SELECT id FROM bookings \
             WHERE booking_type_id = $1 \
               AND status IN ('PENDING', 'CONFIRMED', 'COMPLETED') \
               AND start_time < $3 AND $2 < end_time \
             LIMIT 1",
        )
        .bind(booking.booking_type_id.to_string())
        .bind(booking.start_time)
        .bind(booking.end_time)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = overlap {
            tx.rollback().await?;
            return Ok(Some(id));
        }

        let sql = format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&sql)
            .bind(booking.id.to_string())
            .bind(booking.workspace_id.to_string())
            .bind(booking.booking_type_id.to_string())
            .bind(booking.contact_id.to_string())
            .bind(booking.start_time)
            .bind(booking.end_time)
            .bind(booking.status.as_str())
            .bind(&booking.reference_code)
            .bind(&booking.notes)
            .bind(&booking.metadata)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(None)
    }
}

fn db_code(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

fn db_constraint(e: &sqlx::Error) -> Option<&str> {
    e.as_database_error().and_then(|db| db.constraint())
}

fn parse_id(raw: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(raw).map_err(|e| EngineError::Internal(format!("bad id in database {raw:?}: {e}")))
}

fn workspace_from_row(row: &PgRow) -> Result<Workspace, EngineError> {
    let tz: String = row.try_get("timezone")?;
    let timezone: Tz = tz
        .parse()
        .map_err(|e| EngineError::Internal(format!("bad timezone in database {tz:?}: {e}")))?;
    Ok(Workspace {
        id: parse_id(row.try_get("id")?)?,
        name: row.try_get("name")?,
        timezone,
        business_hours: LocalWindow {
            start: row.try_get("business_start")?,
            end: row.try_get("business_end")?,
        },
        auto_confirm: row.try_get("auto_confirm")?,
    })
}

fn booking_type_from_row(row: &PgRow) -> Result<BookingType, EngineError> {
    let duration: i32 = row.try_get("duration")?;
    Ok(BookingType {
        id: parse_id(row.try_get("id")?)?,
        workspace_id: parse_id(row.try_get("workspace_id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        duration_minutes: u32::try_from(duration)
            .map_err(|_| EngineError::Internal(format!("negative duration {duration}")))?,
        location: row.try_get("location")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rule_from_row(row: &PgRow) -> Result<AvailabilityRule, EngineError> {
    let day: i16 = row.try_get("day_of_week")?;
    Ok(AvailabilityRule {
        id: parse_id(row.try_get("id")?)?,
        booking_type_id: parse_id(row.try_get("booking_type_id")?)?,
        day_of_week: u8::try_from(day).map_err(|_| EngineError::Internal(format!("bad day_of_week {day}")))?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
    })
}

fn contact_from_row(row: &PgRow) -> Result<Contact, EngineError> {
    Ok(Contact {
        id: parse_id(row.try_get("id")?)?,
        workspace_id: parse_id(row.try_get("workspace_id")?)?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, EngineError> {
    let status: String = row.try_get("status")?;
    Ok(Booking {
        id: parse_id(row.try_get("id")?)?,
        workspace_id: parse_id(row.try_get("workspace_id")?)?,
        booking_type_id: parse_id(row.try_get("booking_type_id")?)?,
        contact_id: parse_id(row.try_get("contact_id")?)?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: status.parse().map_err(EngineError::Internal)?,
        reference_code: row.try_get("reference_code")?,
        notes: row.try_get("notes")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl WorkspaceDirectory for PgStore {
    async fn workspace(&self, id: Ulid) -> Result<Option<Workspace>, EngineError> {
        let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(workspace_from_row)
            .transpose()
    }

    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO workspaces (id, name, timezone, business_start, business_end, auto_confirm) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, timezone = EXCLUDED.timezone, \
               business_start = EXCLUDED.business_start, business_end = EXCLUDED.business_end, \
               auto_confirm = EXCLUDED.auto_confirm",
        )
        .bind(workspace.id.to_string())
        .bind(&workspace.name)
        .bind(workspace.timezone.name())
        .bind(workspace.business_hours.start)
        .bind(workspace.business_hours.end)
        .bind(workspace.auto_confirm)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BookingTypeCatalog for PgStore {
    async fn create_booking_type(&self, bt: &BookingType) -> Result<(), EngineError> {
        let sql = format!("INSERT INTO booking_types ({BOOKING_TYPE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)");
        sqlx::query(&sql)
            .bind(bt.id.to_string())
            .bind(bt.workspace_id.to_string())
            .bind(&bt.name)
            .bind(&bt.description)
            .bind(i32::try_from(bt.duration_minutes).unwrap_or(i32::MAX))
            .bind(&bt.location)
            .bind(bt.is_active)
            .bind(bt.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_booking_type(&self, bt: &BookingType) -> Result<(), EngineError> {
        let result = sqlx::query(
            "UPDATE booking_types \
             SET name = $2, description = $3, duration = $4, location = $5, is_active = $6 \
             WHERE id = $1",
        )
        .bind(bt.id.to_string())
        .bind(&bt.name)
        .bind(&bt.description)
        .bind(i32::try_from(bt.duration_minutes).unwrap_or(i32::MAX))
        .bind(&bt.location)
        .bind(bt.is_active)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("booking type", bt.id));
        }
        Ok(())
    }

    async fn booking_type(&self, id: Ulid) -> Result<Option<BookingType>, EngineError> {
        let sql = format!("SELECT {BOOKING_TYPE_COLUMNS} FROM booking_types WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(booking_type_from_row)
            .transpose()
    }

    async fn booking_types(&self, workspace_id: Ulid) -> Result<Vec<BookingType>, EngineError> {
        let sql = format!(
            "SELECT {BOOKING_TYPE_COLUMNS} FROM booking_types WHERE workspace_id = $1 ORDER BY created_at, id"
        );
        sqlx::query(&sql)
            .bind(workspace_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(booking_type_from_row)
            .collect()
    }
}

#[async_trait]
impl AvailabilityRuleStore for PgStore {
    async fn add_rule(&self, rule: &AvailabilityRule) -> Result<(), EngineError> {
        let sql = format!("INSERT INTO availability_rules ({RULE_COLUMNS}) VALUES ($1, $2, $3, $4, $5)");
        sqlx::query(&sql)
            .bind(rule.id.to_string())
            .bind(rule.booking_type_id.to_string())
            .bind(i16::from(rule.day_of_week))
            .bind(rule.start_time)
            .bind(rule.end_time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_rule(&self, booking_type_id: Ulid, rule_id: Ulid) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM availability_rules WHERE id = $1 AND booking_type_id = $2")
            .bind(rule_id.to_string())
            .bind(booking_type_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rules_for(&self, booking_type_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM availability_rules WHERE booking_type_id = $1");
        sqlx::query(&sql)
            .bind(booking_type_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rule_from_row)
            .collect()
    }
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(booking_from_row)
            .transpose()
    }

    async fn bookings(&self, workspace_id: Ulid, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE workspace_id = "));
        qb.push_bind(workspace_id.to_string());
        if let Some(from) = filter.from {
            qb.push(" AND start_time >= ").push_bind(from);
        }
        if let Some(until) = filter.until {
            qb.push(" AND start_time < ").push_bind(until);
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        qb.push(" ORDER BY start_time, id");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        qb.build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(booking_from_row)
            .collect()
    }

    async fn active_in_range(&self, booking_type_id: Ulid, window: &Span) -> Result<Vec<Booking>, EngineError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE booking_type_id = $1 \
               AND status IN ('PENDING', 'CONFIRMED', 'COMPLETED') \
               AND start_time < $3 AND $2 < end_time \
             ORDER BY start_time"
        );
        sqlx::query(&sql)
            .bind(booking_type_id.to_string())
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(booking_from_row)
            .collect()
    }

    async fn insert_if_free(&self, booking: &Booking) -> Result<(), EngineError> {
        for attempt in 1..=MAX_COMMIT_RETRIES {
            match self.insert_once(booking).await {
                Ok(None) => return Ok(()),
                Ok(Some(holder)) => {
                    return Err(EngineError::SlotConflict { booking_id: Ulid::from_string(&holder).ok() });
                }
                Err(e) => match db_code(&e).as_deref() {
                    Some(SERIALIZATION_FAILURE) => {
                        warn!(attempt, booking = %booking.id, "serialization failure, retrying commit");
                        metrics::counter!(
                            crate::observability::COMMIT_RETRIES_TOTAL,
                            "reason" => "serialization"
                        )
                        .increment(1);
                    }
                    Some(EXCLUSION_VIOLATION) => return Err(EngineError::SlotConflict { booking_id: None }),
                    Some(UNIQUE_VIOLATION) if db_constraint(&e) == Some(REFERENCE_CONSTRAINT) => {
                        return Err(EngineError::ReferenceCollision(booking.reference_code.clone()));
                    }
                    _ => return Err(e.into()),
                },
            }
        }
        Err(EngineError::Internal(format!(
            "commit of booking {} still conflicting after {MAX_COMMIT_RETRIES} serializable attempts",
            booking.id
        )))
    }

    async fn update_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        let sql = format!(
            "UPDATE bookings SET status = $3, updated_at = $4 \
             WHERE id = $1 AND status = $2 \
             RETURNING {BOOKING_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = updated {
            return booking_from_row(&row);
        }

        match self.booking(id).await? {
            None => Err(EngineError::not_found("booking", id)),
            Some(current) => Err(EngineError::InvalidTransition { from: current.status, to: next }),
        }
    }
}

#[async_trait]
impl ContactDirectory for PgStore {
    async fn contact(&self, id: Ulid) -> Result<Option<Contact>, EngineError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(contact_from_row)
            .transpose()
    }

    async fn find_by_email(&self, workspace_id: Ulid, email: &str) -> Result<Option<Contact>, EngineError> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE workspace_id = $1 AND email IS NOT NULL AND lower(email) = lower($2)"
        );
        sqlx::query(&sql)
            .bind(workspace_id.to_string())
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(contact_from_row)
            .transpose()
    }

    async fn insert_or_get(&self, contact: &Contact) -> Result<Contact, EngineError> {
        let sql = format!(
            "INSERT INTO contacts ({CONTACT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (workspace_id, lower(email)) WHERE email IS NOT NULL DO NOTHING \
             RETURNING {CONTACT_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(contact.id.to_string())
            .bind(contact.workspace_id.to_string())
            .bind(&contact.first_name)
            .bind(&contact.last_name)
            .bind(&contact.email)
            .bind(&contact.phone)
            .bind(contact.created_at)
            .bind(contact.updated_at)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = inserted {
            return contact_from_row(&row);
        }

        // Only reachable when the email is already taken in this workspace.
        let email = contact.email.as_deref().unwrap_or_default();
        self.find_by_email(contact.workspace_id, email)
            .await?
            .ok_or_else(|| EngineError::Internal(format!("contact for {email:?} vanished after conflict")))
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), EngineError> {
        let result = sqlx::query(
            "UPDATE contacts SET first_name = $2, last_name = $3, phone = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(contact.id.to_string())
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.phone)
        .bind(contact.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("contact", contact.id));
        }
        Ok(())
    }
}
