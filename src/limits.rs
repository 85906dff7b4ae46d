pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_LOCATION_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 5_000;
pub const MAX_CONTACT_FIELD_LEN: usize = 200;
/// Serialized size of a booking's metadata object.
pub const MAX_METADATA_BYTES: usize = 16 * 1024;

pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_RULES_PER_BOOKING_TYPE: usize = 64;
pub const MAX_BOOKING_TYPES_PER_WORKSPACE: usize = 500;

/// How far ahead availability can be listed, in days.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 366;
pub const MAX_BOOKINGS_PER_PAGE: usize = 500;

/// Fresh reference codes tried before a reservation gives up.
pub const MAX_REFERENCE_ATTEMPTS: usize = 5;
/// Serializable-transaction retries on the Postgres commit path.
pub const MAX_COMMIT_RETRIES: usize = 5;
