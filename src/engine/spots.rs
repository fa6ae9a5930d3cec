use tracing::info;
use ulid::Ulid;

use crate::clock::{local_date, time_of_day};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::{compute_price, duration_hours};

use super::validate::{normalize_label, optional_text, validate_price, validate_span};
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_spot(&self, id: Ulid, new: NewSpot) -> Result<(), EngineError> {
        let label = normalize_label(&new.label)?;
        let address = optional_text(new.address, MAX_ADDRESS_LEN, "address too long")?;
        let payout = optional_text(new.payout, MAX_PAYOUT_LEN, "payout details too long")?;
        validate_price(new.price_per_hour, &self.config)?;

        let _gate = self.commit_gate.read().await;
        let lock = self.user_lock(new.supplier_id);
        let _supplier = lock.lock().await;

        if self.store.contains_spot(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.store.active_spot_count(&new.supplier_id) >= self.config.max_spots_per_supplier {
            return Err(EngineError::LimitExceeded("too many spots for supplier"));
        }

        let event = Event::SpotCreated {
            id,
            supplier_id: new.supplier_id,
            label,
            address,
            price_per_hour: new.price_per_hour,
            partial_allowed: new.partial_allowed,
            payout,
            created_at: self.clock.now(),
        };
        self.wal_append(&event).await?;
        self.store.apply_event(&event);
        info!("spot {id} listed by {}", new.supplier_id);
        Ok(())
    }

    /// Hide a spot from search and booking. Existing bookings are untouched.
    /// Returns false if the spot does not exist.
    pub async fn deactivate_spot(&self, id: Ulid) -> Result<bool, EngineError> {
        let Some(ss) = self.store.get_spot(&id) else {
            return Ok(false);
        };
        let _gate = self.commit_gate.read().await;
        let mut guard = ss.write().await;
        if guard.spot.active {
            self.persist_and_apply(&mut guard, &Event::SpotDeactivated { id }).await?;
        }
        Ok(true)
    }

    pub async fn spot(&self, id: &Ulid) -> Result<Spot, EngineError> {
        let ss = self.spot_state(id)?;
        let guard = ss.read().await;
        Ok(guard.spot.clone())
    }

    /// Active spots of one supplier, newest first.
    pub async fn spots_of_supplier(&self, supplier_id: &Ulid) -> Vec<Spot> {
        let mut spots = Vec::new();
        for ss in self.store.spots_of_supplier(supplier_id) {
            let guard = ss.read().await;
            if guard.spot.active {
                spots.push(guard.spot.clone());
            }
        }
        spots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        spots
    }

    /// Offer a free interval on an active spot.
    pub async fn publish_window(
        &self,
        id: Ulid,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Ulid, EngineError> {
        let span = validate_span(start, end)?;
        let ss = self.spot_state(&spot_id)?;

        let _gate = self.commit_gate.read().await;
        let mut guard = ss.write().await;
        if !guard.spot.active {
            return Err(EngineError::NotFound(spot_id));
        }
        if guard.windows.len() >= MAX_WINDOWS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many windows on spot"));
        }
        if self.store.spot_for_window(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::WindowPublished { id, spot_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::WINDOWS_PUBLISHED_TOTAL).increment(1);
        Ok(id)
    }

    /// Clear a window's claim. Releasing a free window is a no-op.
    ///
    /// A window still held by a pending or confirmed booking is refused with
    /// `WindowUnavailable`; `cancel_booking` frees those.
    pub async fn release_window(&self, window_id: Ulid) -> Result<(), EngineError> {
        let spot_id = self
            .store
            .spot_for_window(&window_id)
            .ok_or(EngineError::NotFound(window_id))?;
        let ss = self.spot_state(&spot_id)?;

        let _gate = self.commit_gate.read().await;
        let mut guard = ss.write().await;
        let window = guard.window(&window_id).ok_or(EngineError::NotFound(window_id))?;
        let held = window
            .booking_id
            .and_then(|b| guard.bookings.get(&b))
            .is_some_and(|b| b.status.is_active());
        if held {
            return Err(EngineError::WindowUnavailable(window_id));
        }
        if window.booked {
            let event = Event::WindowReleased { id: window_id, spot_id };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(())
    }

    /// Open windows on active spots that have not ended yet, earliest first.
    pub async fn search(&self, filter: &SearchFilter) -> Vec<WindowView> {
        let now = self.clock.now();
        let offset = self.config.utc_offset;
        let mut found = Vec::new();
        for ss in self.store.all_spots() {
            let guard = ss.read().await;
            if !guard.spot.active {
                continue;
            }
            for w in guard.open_windows(now) {
                if let Some(date) = filter.date
                    && local_date(w.span.start, offset) != Some(date)
                {
                    continue;
                }
                if filter.bounds != TimeBounds::default() {
                    let (Some(start), Some(end)) = (
                        time_of_day(w.span.start, offset),
                        time_of_day(w.span.end, offset),
                    ) else {
                        continue;
                    };
                    if !filter.bounds.admits(start, end) {
                        continue;
                    }
                }
                found.push(WindowView::from_parts(&guard.spot, w));
            }
        }
        found.sort_by(|a, b| a.start.cmp(&b.start).then(a.window_id.cmp(&b.window_id)));
        found
    }

    pub async fn get_window(&self, window_id: &Ulid) -> Result<WindowView, EngineError> {
        let spot_id = self
            .store
            .spot_for_window(window_id)
            .ok_or(EngineError::NotFound(*window_id))?;
        let ss = self.spot_state(&spot_id)?;
        let guard = ss.read().await;
        let w = guard.window(window_id).ok_or(EngineError::NotFound(*window_id))?;
        Ok(WindowView::from_parts(&guard.spot, w))
    }

    /// All windows of one spot, booked or not, in start order.
    pub async fn windows_of_spot(&self, spot_id: &Ulid) -> Result<Vec<WindowView>, EngineError> {
        let ss = self.spot_state(spot_id)?;
        let guard = ss.read().await;
        Ok(guard
            .windows
            .iter()
            .map(|w| WindowView::from_parts(&guard.spot, w))
            .collect())
    }

    /// Price a window for booking. Fails if it cannot be booked right now.
    pub async fn quote(&self, window_id: Ulid) -> Result<Quote, EngineError> {
        let unavailable = EngineError::WindowUnavailable(window_id);
        let Some(spot_id) = self.store.spot_for_window(&window_id) else {
            return Err(unavailable);
        };
        let ss = self.spot_state(&spot_id)?;
        let guard = ss.read().await;
        let Some(w) = guard.window(&window_id) else {
            return Err(unavailable);
        };
        if w.booked || !guard.spot.active || w.span.end <= self.clock.now() {
            return Err(unavailable);
        }
        Ok(Quote {
            window_id,
            total_price: compute_price(guard.spot.price_per_hour, w.span.start, w.span.end)?,
            duration_hours: duration_hours(&w.span),
        })
    }
}
