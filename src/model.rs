use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open interval `[start, end)` in UTC. Wall-clock time only exists
/// while generating slots; everything stored is an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Tenant boundary. Owned by the workspace settings subsystem; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: Ulid,
    pub name: String,
    pub timezone: Tz,
    /// Default Monday–Friday window used to seed new booking types.
    pub business_hours: LocalWindow,
    /// New bookings start CONFIRMED instead of PENDING.
    pub auto_confirm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingType {
    pub id: Ulid,
    pub workspace_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    /// Slot length in minutes. Changing it never touches committed bookings.
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl BookingType {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// Recurring weekly window. `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub booking_type_id: Ulid,
    pub day_of_week: u8,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    NoShow,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::NoShow,
        BookingStatus::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::NoShow => "NO_SHOW",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown booking status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub workspace_id: Ulid,
    pub booking_type_id: Ulid,
    pub contact_id: Ulid,
    pub start_time: DateTime<Utc>,
    /// Fixed at creation from the booking type's duration at that moment.
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub reference_code: String,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Ulid,
    pub workspace_id: Ulid,
    pub first_name: String,
    pub last_name: String,
    /// Stored lower-cased; the dedupe key together with `workspace_id`.
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn display_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            (first, "") => first.to_string(),
            ("", last) => last.to_string(),
            (first, last) => format!("{first} {last}"),
        }
    }
}

/// Contact fields as submitted by a public caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Notifications fanned out to the automation subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingEvent {
    Created(Booking),
    StatusChanged {
        booking: Booking,
        from: BookingStatus,
    },
}

impl BookingEvent {
    pub fn workspace_id(&self) -> Ulid {
        match self {
            BookingEvent::Created(booking) | BookingEvent::StatusChanged { booking, .. } => {
                booking.workspace_id
            }
        }
    }

    pub fn booking(&self) -> &Booking {
        match self {
            BookingEvent::Created(booking) | BookingEvent::StatusChanged { booking, .. } => booking,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Minutes.
    pub duration: u32,
}

impl Slot {
    pub fn from_span(span: Span) -> Self {
        Self {
            start_time: span.start,
            end_time: span.end,
            duration: u32::try_from(span.duration().num_minutes()).unwrap_or(u32::MAX),
        }
    }
}

/// Staff booking list filter. Bounds apply to `start_time`; an empty
/// `statuses` means every status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub statuses: Vec<BookingStatus>,
    pub limit: Option<usize>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.from.is_none_or(|from| booking.start_time >= from)
            && self.until.is_none_or(|until| booking.start_time < until)
            && (self.statuses.is_empty() || self.statuses.contains(&booking.status))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingTypeSummary {
    pub name: String,
    pub duration: u32,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub display_name: String,
    pub email: Option<String>,
}

/// What a public caller gets back after booking. Carries no internal ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    pub contact: ContactSummary,
    pub booking_type: BookingTypeSummary,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reference_code: String,
    pub status: BookingStatus,
}

/// `HH:mm` (de)serialization for local wall-clock times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s.trim(), FORMAT).ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected HH:mm, got {raw:?}")))
    }
}
