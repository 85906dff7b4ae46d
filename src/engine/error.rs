use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// The requested interval was taken between listing and commit.
    #[error("requested slot is no longer available")]
    SlotConflict { booking_id: Option<Ulid> },
    #[error("cannot transition booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    /// Storage rejected a duplicate reference code; the caller regenerates.
    #[error("reference code already in use: {0}")]
    ReferenceCollision(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation { field, message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound { entity, id: id.to_string() }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        EngineError::Internal(format!("migration failed: {e}"))
    }
}
