use rust_decimal::Decimal;
use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid interval: end must be after start")]
    InvalidInterval,
    #[error("window unavailable: {0}")]
    WindowUnavailable(Ulid),
    #[error("cannot book a window on your own spot")]
    SelfBookingForbidden,
    #[error("active booking limit of {0} reached")]
    BookingLimitExceeded(u32),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("price {0} outside allowed range")]
    InvalidPrice(Decimal),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Store(String),
}

impl EngineError {
    /// Short label for the rejection-reason metric.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval => "invalid_interval",
            EngineError::WindowUnavailable(_) => "window_unavailable",
            EngineError::SelfBookingForbidden => "self_booking",
            EngineError::BookingLimitExceeded(_) => "booking_limit",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidPrice(_) => "invalid_price",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::Store(_) => "store",
        }
    }
}
