use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Events that rebuild one spot exactly as it is now.
fn spot_events(ss: &SpotState, out: &mut Vec<Event>) {
    let spot = &ss.spot;
    out.push(Event::SpotCreated {
        id: spot.id,
        supplier_id: spot.supplier_id,
        label: spot.label.clone(),
        address: spot.address.clone(),
        price_per_hour: spot.price_per_hour,
        partial_allowed: spot.partial_allowed,
        payout: spot.payout.clone(),
        created_at: spot.created_at,
    });
    if !spot.active {
        out.push(Event::SpotDeactivated { id: spot.id });
    }
    for w in &ss.windows {
        out.push(Event::WindowPublished {
            id: w.id,
            spot_id: spot.id,
            span: w.span,
        });
    }

    // Creation order matters: a later booking on the same window must win.
    let mut bookings: Vec<&Booking> = ss.bookings.values().collect();
    bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    for b in bookings {
        out.push(Event::BookingCreated {
            id: b.id,
            spot_id: spot.id,
            window_id: b.window_id,
            consumer_id: b.consumer_id,
            span: b.span,
            total_price: b.total_price,
            created_at: b.created_at,
        });
        let (id, spot_id) = (b.id, spot.id);
        match b.status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => out.push(Event::BookingConfirmed { id, spot_id }),
            BookingStatus::Completed => {
                out.push(Event::BookingConfirmed { id, spot_id });
                out.push(Event::BookingCompleted { id, spot_id });
            }
            BookingStatus::Cancelled => out.push(Event::BookingCancelled { id, spot_id }),
        }
    }
}

impl Engine {
    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut spots = Vec::new();
        for ss in self.store.all_spots() {
            spots.push(ss.read_owned().await);
        }
        spots.sort_by(|a, b| a.spot.created_at.cmp(&b.spot.created_at).then(a.spot.id.cmp(&b.spot.id)));

        let mut events = Vec::new();
        for ss in &spots {
            spot_events(ss, &mut events);
        }
        drop(spots);

        let mut subs = Vec::new();
        for sub in self.store.all_subscriptions() {
            subs.push(sub.lock().await.clone());
        }
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        for sub in subs {
            events.push(Event::SubscriptionCreated {
                id: sub.id,
                consumer_id: sub.consumer_id,
                spot_id: sub.spot_id,
                desired_date: sub.desired_date,
                bounds: sub.bounds,
                created_at: sub.created_at,
            });
            if !sub.active {
                events.push(Event::SubscriptionDeactivated { id: sub.id });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(count)
    }
}
