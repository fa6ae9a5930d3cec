use std::collections::HashMap;

use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::pricing::compute_price;

use super::{Engine, EngineError};

impl Engine {
    /// Claim a window for `consumer_id`.
    ///
    /// The consumer lock makes the active-booking count check and the insert
    /// one step; the spot write lock does the same for the window claim.
    pub async fn create_booking(
        &self,
        id: Ulid,
        consumer_id: Ulid,
        window_id: Ulid,
    ) -> Result<BookingReceipt, EngineError> {
        let result = self.try_create_booking(id, consumer_id, window_id).await;
        match &result {
            Ok(receipt) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                info!("booking {id}: window {window_id} for {consumer_id} at {}", receipt.total_price);
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.kind())
                    .increment(1);
                debug!("booking rejected for {consumer_id} on {window_id}: {e}");
            }
        }
        result
    }

    async fn try_create_booking(
        &self,
        id: Ulid,
        consumer_id: Ulid,
        window_id: Ulid,
    ) -> Result<BookingReceipt, EngineError> {
        let unavailable = EngineError::WindowUnavailable(window_id);
        let Some(spot_id) = self.store.spot_for_window(&window_id) else {
            return Err(unavailable);
        };
        let ss = self.spot_state(&spot_id)?;

        let _gate = self.commit_gate.read().await;
        let lock = self.user_lock(consumer_id);
        let _consumer = lock.lock().await;
        let mut guard = ss.write().await;

        if self.store.spot_for_booking(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let now = self.clock.now();
        let span = match guard.window(&window_id) {
            Some(w) if !w.booked && guard.spot.active && w.span.end > now => w.span,
            _ => return Err(unavailable),
        };
        if guard.spot.supplier_id == consumer_id {
            return Err(EngineError::SelfBookingForbidden);
        }
        let max = self.config.max_active_bookings;
        if self.store.active_booking_count(&consumer_id) >= max {
            return Err(EngineError::BookingLimitExceeded(max));
        }
        let total_price = compute_price(guard.spot.price_per_hour, span.start, span.end)?;

        let event = Event::BookingCreated {
            id,
            spot_id,
            window_id,
            consumer_id,
            span,
            total_price,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(BookingReceipt {
            booking_id: id,
            total_price,
        })
    }

    /// Cancel a booking and free its window. Returns false if the booking
    /// does not exist. Cancelling twice is harmless, and completed bookings
    /// stay completed.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let Some(mut guard) = self.booking_write(&id).await else {
            return Ok(false);
        };
        let Some(booking) = guard.bookings.get(&id) else {
            return Ok(false);
        };
        if booking.status.is_active() {
            let event = Event::BookingCancelled {
                id,
                spot_id: booking.spot_id,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
            info!("booking {id} cancelled");
        }
        Ok(true)
    }

    /// Cancel a booking that is still pending and unpaid once its payment
    /// window has run out. Returns false if it was paid or cancelled in the
    /// meantime, or is not due yet.
    pub async fn expire_unpaid(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let Some(window) = self.config.payment_window else {
            return Ok(false);
        };
        let _gate = self.commit_gate.read().await;
        let Some(mut guard) = self.booking_write(&id).await else {
            return Ok(false);
        };
        let Some(booking) = guard.bookings.get(&id) else {
            return Ok(false);
        };
        let due = booking.created_at.saturating_add(window) <= now;
        if !due || booking.status != BookingStatus::Pending || booking.payment != PaymentStatus::Unpaid {
            return Ok(false);
        }
        let event = Event::BookingCancelled {
            id,
            spot_id: booking.spot_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// Record payment for a pending booking. Returns false if it is not pending.
    pub async fn confirm_payment(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.booking_write(&id).await.ok_or(EngineError::NotFound(id))?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Pending {
            return Ok(false);
        }
        let event = Event::BookingConfirmed {
            id,
            spot_id: booking.spot_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {id} paid");
        Ok(true)
    }

    /// Mark a confirmed booking as used. Returns false if it is not confirmed.
    pub async fn complete_booking(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.booking_write(&id).await.ok_or(EngineError::NotFound(id))?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Ok(false);
        }
        let event = Event::BookingCompleted {
            id,
            spot_id: booking.spot_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    pub async fn get_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        let spot_id = self.store.spot_for_booking(id).ok_or(EngineError::NotFound(*id))?;
        let ss = self.spot_state(&spot_id)?;
        let guard = ss.read().await;
        guard.bookings.get(id).cloned().ok_or(EngineError::NotFound(*id))
    }

    pub fn active_booking_count(&self, consumer_id: &Ulid) -> u32 {
        self.store.active_booking_count(consumer_id)
    }

    /// A consumer's bookings, newest first, optionally filtered by status.
    pub async fn bookings_of_consumer(
        &self,
        consumer_id: &Ulid,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let mut by_spot: HashMap<Ulid, Vec<Ulid>> = HashMap::new();
        for booking_id in self.store.bookings_of_consumer(consumer_id) {
            if let Some(spot_id) = self.store.spot_for_booking(&booking_id) {
                by_spot.entry(spot_id).or_default().push(booking_id);
            }
        }

        let mut bookings = Vec::new();
        for (spot_id, ids) in by_spot {
            let Some(ss) = self.store.get_spot(&spot_id) else { continue };
            let guard = ss.read().await;
            bookings.extend(
                ids.iter()
                    .filter_map(|id| guard.bookings.get(id))
                    .filter(|b| status.is_none_or(|s| b.status == s))
                    .cloned(),
            );
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        bookings
    }

    /// Pending and confirmed bookings on a supplier's spots, earliest start first.
    pub async fn bookings_of_supplier(&self, supplier_id: &Ulid) -> Vec<Booking> {
        let mut bookings = Vec::new();
        for ss in self.store.spots_of_supplier(supplier_id) {
            let guard = ss.read().await;
            bookings.extend(guard.bookings.values().filter(|b| b.status.is_active()).cloned());
        }
        bookings.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        bookings
    }

    /// Unpaid bookings past the payment window, and paid bookings whose slot
    /// has ended. Spots locked by a writer are skipped until the next sweep.
    pub fn collect_overdue(&self, now: Ms) -> (Vec<Ulid>, Vec<Ulid>) {
        let mut unpaid = Vec::new();
        let mut finished = Vec::new();
        for ss in self.store.all_spots() {
            let Ok(guard) = ss.try_read() else { continue };
            for b in guard.bookings.values() {
                match b.status {
                    BookingStatus::Pending => {
                        if let Some(window) = self.config.payment_window
                            && b.created_at.saturating_add(window) <= now
                        {
                            unpaid.push(b.id);
                        }
                    }
                    BookingStatus::Confirmed if b.span.end <= now => finished.push(b.id),
                    _ => {}
                }
            }
        }
        (unpaid, finished)
    }
}
