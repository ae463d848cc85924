use ulid::Ulid;

use super::reservations::EDIT_LOCK_HOURS;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or ill-ordered input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error(
        "reservation starts in {starts_in_minutes} minutes; it cannot be changed less than {lock} hours before the start",
        lock = EDIT_LOCK_HOURS
    )]
    EditWindow { starts_in_minutes: i64 },
    #[error("vehicle {0} is not available for reservation")]
    Unavailable(Ulid),
    #[error("vehicle is already reserved for this period: conflicts with reservation {0}")]
    Conflict(Ulid),
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub(crate) fn not_found(entity: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    /// Short label used as the `outcome` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::EditWindow { .. } => "edit_window",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::Conflict(_) => "conflict",
            EngineError::Store(_) => "store",
        }
    }
}
