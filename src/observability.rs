use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── Requests ────────────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "spotbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "spotbook_query_duration_seconds";

// ── Connections ─────────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "spotbook_connections_active";
pub const CONNECTIONS_TOTAL: &str = "spotbook_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "spotbook_connections_rejected_total";

/// Counter: logins with a user name that is not a valid id.
pub const AUTH_FAILURES_TOTAL: &str = "spotbook_auth_failures_total";

// ── Storage ─────────────────────────────────────────────────────

pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotbook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotbook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

pub const WINDOWS_PUBLISHED_TOTAL: &str = "spotbook_windows_published_total";
pub const BOOKINGS_CREATED_TOTAL: &str = "spotbook_bookings_created_total";

/// Counter: booking attempts refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "spotbook_bookings_rejected_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "spotbook_bookings_cancelled_total";
pub const BOOKINGS_EXPIRED_TOTAL: &str = "spotbook_bookings_expired_total";
pub const BOOKINGS_COMPLETED_TOTAL: &str = "spotbook_bookings_completed_total";
pub const ALERTS_DELIVERED_TOTAL: &str = "spotbook_alerts_delivered_total";
pub const ALERTS_FAILED_TOTAL: &str = "spotbook_alerts_failed_total";

/// Serve Prometheus metrics on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSpot { .. } => "insert_spot",
        Command::DeleteSpot { .. } => "delete_spot",
        Command::SelectSpots => "select_spots",
        Command::InsertWindow { .. } => "insert_window",
        Command::ReleaseWindow { .. } => "release_window",
        Command::SelectWindows { .. } => "select_windows",
        Command::SelectWindow { .. } => "select_window",
        Command::SelectSpotWindows { .. } => "select_spot_windows",
        Command::SelectQuote { .. } => "select_quote",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertPayment { .. } => "insert_payment",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertSubscription { .. } => "insert_subscription",
        Command::DeleteSubscription { .. } => "delete_subscription",
        Command::SelectSubscriptions => "select_subscriptions",
        Command::SelectAlerts => "select_alerts",
        Command::SelectStats { .. } => "select_stats",
    }
}
