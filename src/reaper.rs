use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::observability;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    pub expired: usize,
    pub completed: usize,
}

/// Cancel unpaid bookings past the payment window and complete paid bookings
/// whose slot is over.
pub async fn sweep(engine: &Engine) -> Sweep {
    let now = engine.now();
    let (unpaid, finished) = engine.collect_overdue(now);
    let mut done = Sweep::default();
    for id in unpaid {
        match engine.expire_unpaid(id, now).await {
            Ok(true) => {
                info!("expired unpaid booking {id}");
                done.expired += 1;
            }
            // Paid or cancelled since collection.
            Ok(false) => debug!("booking {id} no longer overdue"),
            Err(e) => debug!("reaper skip {id}: {e}"),
        }
    }
    for id in finished {
        match engine.complete_booking(id).await {
            Ok(true) => done.completed += 1,
            Ok(false) => {}
            Err(e) => debug!("reaper skip {id}: {e}"),
        }
    }
    metrics::counter!(observability::BOOKINGS_EXPIRED_TOTAL).increment(done.expired as u64);
    metrics::counter!(observability::BOOKINGS_COMPLETED_TOTAL).increment(done.completed as u64);
    done
}

/// Background task: sweep every five seconds.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        sweep(&engine).await;
    }
}

/// Background task: compact the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            error!("WAL compaction failed: {e}");
        }
    }
}
