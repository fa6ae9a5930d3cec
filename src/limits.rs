use crate::model::Ms;

// Hard input limits. Business limits (active bookings, spots per supplier,
// price range) live in `config::EngineConfig`.

pub const MAX_LABEL_LEN: usize = 10;
pub const MAX_ADDRESS_LEN: usize = 256;
pub const MAX_PAYOUT_LEN: usize = 64;

pub const MAX_WINDOWS_PER_SPOT: usize = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single window may not span more than one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Undelivered alerts kept per recipient before delivery starts failing.
pub const MAILBOX_CAPACITY: usize = 64;
