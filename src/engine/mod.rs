mod bookings;
mod compact;
mod error;
mod matcher;
mod spots;
mod stats;
mod store;
mod validate;

pub use error::EngineError;
pub use matcher::{DispatchReport, alert_text};
pub use store::{SharedSpotState, SharedSubscription, Store};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// The reservation engine: spots, windows, bookings and subscriptions.
///
/// Lock order is always commit gate → per-user lock → spot lock (or
/// subscription lock). Every mutation writes its event to the WAL before
/// touching memory.
pub struct Engine {
    pub(super) store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot cannot miss an event.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes limit checks per consumer / supplier.
    user_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    pub(super) config: EngineConfig,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, config: EngineConfig, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_tail {
            warn!("discarded torn tail of {} after {} bytes", wal_path.display(), replay.valid_len);
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            user_locks: DashMap::new(),
            config,
            clock,
        };
        // Nothing else holds these locks yet, so try_* on them always succeeds.
        for event in &replay.events {
            engine.store.apply_event(event);
        }
        info!(
            "replayed {} events from {} ({} spots)",
            replay.events.len(),
            wal_path.display(),
            engine.store.spot_count()
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Hand the event to the group-commit writer and wait for the fsync.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// WAL-append, then apply under the caller's spot lock.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_spot(ss, event);
        Ok(())
    }

    pub(super) fn user_lock(&self, user_id: Ulid) -> Arc<Mutex<()>> {
        self.user_locks.entry(user_id).or_default().clone()
    }

    pub(super) fn spot_state(&self, spot_id: &Ulid) -> Result<SharedSpotState, EngineError> {
        self.store.get_spot(spot_id).ok_or(EngineError::NotFound(*spot_id))
    }

    /// Resolve a booking to its spot and take that spot's write lock.
    pub(super) async fn booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Option<OwnedRwLockWriteGuard<SpotState>> {
        let spot_id = self.store.spot_for_booking(booking_id)?;
        let ss = self.store.get_spot(&spot_id)?;
        Some(ss.write_owned().await)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
