use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;
use rust_decimal::Decimal;

use crate::clock::utc;
use crate::model::Ms;

/// Business rules the engine enforces.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pending + confirmed bookings one consumer may hold at once.
    pub max_active_bookings: u32,
    /// Active spots one supplier may list.
    pub max_spots_per_supplier: u32,
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Time zone used for calendar dates and clock-time matching.
    pub utc_offset: FixedOffset,
    /// Unpaid bookings older than this are cancelled by the reaper. `None` disables expiry.
    pub payment_window: Option<Ms>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_bookings: 5,
            max_spots_per_supplier: 10,
            min_price: Decimal::ONE,
            max_price: Decimal::from(10_000),
            utc_offset: utc(),
            payment_window: Some(24 * 3_600_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub engine: EngineConfig,
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Read `SPOTBOOK_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = EngineConfig::default();
        let utc_offset = parsed::<i32>(&lookup, "SPOTBOOK_UTC_OFFSET_MINUTES")
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .unwrap_or(defaults.utc_offset);
        let payment_window = match parsed::<u64>(&lookup, "SPOTBOOK_PAYMENT_WINDOW_SECS") {
            Some(0) => None,
            Some(secs) => Ms::try_from(secs.saturating_mul(1000)).ok(),
            None => defaults.payment_window,
        };

        let engine = EngineConfig {
            max_active_bookings: parsed(&lookup, "SPOTBOOK_MAX_ACTIVE_BOOKINGS")
                .unwrap_or(defaults.max_active_bookings),
            max_spots_per_supplier: parsed(&lookup, "SPOTBOOK_MAX_SPOTS_PER_SUPPLIER")
                .unwrap_or(defaults.max_spots_per_supplier),
            min_price: parsed(&lookup, "SPOTBOOK_MIN_PRICE").unwrap_or(defaults.min_price),
            max_price: parsed(&lookup, "SPOTBOOK_MAX_PRICE").unwrap_or(defaults.max_price),
            utc_offset,
            payment_window,
        };

        Self {
            bind: lookup("SPOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SPOTBOOK_PORT").unwrap_or(5433),
            data_dir: lookup("SPOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: lookup("SPOTBOOK_PASSWORD").unwrap_or_else(|| "spotbook".into()),
            admin_password: lookup("SPOTBOOK_ADMIN_PASSWORD")
                .unwrap_or_else(|| "spotbook-admin".into()),
            max_connections: parsed(&lookup, "SPOTBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "SPOTBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            tls_cert: lookup("SPOTBOOK_TLS_CERT"),
            tls_key: lookup("SPOTBOOK_TLS_KEY"),
            metrics_port: parsed(&lookup, "SPOTBOOK_METRICS_PORT"),
            engine,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("spotbook.wal")
    }
}
