use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

pub type SharedSpotState = Arc<RwLock<SpotState>>;
pub type SharedSubscription = Arc<Mutex<Subscription>>;

/// In-memory state plus the secondary indexes needed to find it.
///
/// All mutation goes through `apply_event` / `apply_to_spot`, so replay and
/// live writes produce identical state.
#[derive(Default)]
pub struct Store {
    spots: DashMap<Ulid, SharedSpotState>,
    subscriptions: DashMap<Ulid, SharedSubscription>,
    window_to_spot: DashMap<Ulid, Ulid>,
    booking_to_spot: DashMap<Ulid, Ulid>,
    consumer_bookings: DashMap<Ulid, Vec<Ulid>>,
    supplier_spots: DashMap<Ulid, Vec<Ulid>>,
    active_bookings: DashMap<Ulid, u32>,
    active_spots: DashMap<Ulid, u32>,
}

fn bump(counter: &DashMap<Ulid, u32>, id: Ulid) {
    *counter.entry(id).or_insert(0) += 1;
}

fn drop_one(counter: &DashMap<Ulid, u32>, id: &Ulid) {
    if let Some(mut n) = counter.get_mut(id) {
        *n = n.saturating_sub(1);
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Spots ────────────────────────────────────────────────

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn contains_spot(&self, id: &Ulid) -> bool {
        self.spots.contains_key(id)
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.spots.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every spot handle, so no DashMap shard is held across an await.
    pub fn all_spots(&self) -> Vec<SharedSpotState> {
        self.spots.iter().map(|e| e.value().clone()).collect()
    }

    pub fn spots_of_supplier(&self, supplier_id: &Ulid) -> Vec<SharedSpotState> {
        let ids = self
            .supplier_spots
            .get(supplier_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_spot(id)).collect()
    }

    pub fn active_spot_count(&self, supplier_id: &Ulid) -> u32 {
        self.active_spots.get(supplier_id).map_or(0, |n| *n)
    }

    fn insert_spot(&self, spot: Spot) {
        let (id, supplier_id, active) = (spot.id, spot.supplier_id, spot.active);
        self.spots.insert(id, Arc::new(RwLock::new(SpotState::new(spot))));
        self.supplier_spots.entry(supplier_id).or_default().push(id);
        if active {
            bump(&self.active_spots, supplier_id);
        }
    }

    // ── Windows & bookings index ─────────────────────────────

    pub fn spot_for_window(&self, window_id: &Ulid) -> Option<Ulid> {
        self.window_to_spot.get(window_id).map(|e| *e.value())
    }

    pub fn spot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_spot.get(booking_id).map(|e| *e.value())
    }

    pub fn bookings_of_consumer(&self, consumer_id: &Ulid) -> Vec<Ulid> {
        self.consumer_bookings
            .get(consumer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn active_booking_count(&self, consumer_id: &Ulid) -> u32 {
        self.active_bookings.get(consumer_id).map_or(0, |n| *n)
    }

    // ── Subscriptions ────────────────────────────────────────

    pub fn get_subscription(&self, id: &Ulid) -> Option<SharedSubscription> {
        self.subscriptions.get(id).map(|e| e.value().clone())
    }

    pub fn all_subscriptions(&self) -> Vec<SharedSubscription> {
        self.subscriptions.iter().map(|e| e.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event whose locks are not held by the caller (replay, or
    /// creation events that introduce a new map entry).
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::SpotCreated {
                id,
                supplier_id,
                label,
                address,
                price_per_hour,
                partial_allowed,
                payout,
                created_at,
            } => self.insert_spot(Spot {
                id: *id,
                supplier_id: *supplier_id,
                label: label.clone(),
                address: address.clone(),
                price_per_hour: *price_per_hour,
                partial_allowed: *partial_allowed,
                payout: payout.clone(),
                active: true,
                created_at: *created_at,
            }),
            Event::SubscriptionCreated {
                id,
                consumer_id,
                spot_id,
                desired_date,
                bounds,
                created_at,
            } => {
                let sub = Subscription {
                    id: *id,
                    consumer_id: *consumer_id,
                    spot_id: *spot_id,
                    notify_any: spot_id.is_none(),
                    desired_date: *desired_date,
                    bounds: *bounds,
                    active: true,
                    created_at: *created_at,
                    sending: false,
                };
                self.subscriptions.insert(*id, Arc::new(Mutex::new(sub)));
            }
            Event::SubscriptionDeactivated { id } => {
                if let Some(sub) = self.get_subscription(id)
                    && let Ok(mut guard) = sub.try_lock()
                {
                    apply_to_subscription(&mut guard, event);
                }
            }
            other => {
                if let Some(spot_id) = other.spot_id()
                    && let Some(ss) = self.get_spot(&spot_id)
                    && let Ok(mut guard) = ss.try_write()
                {
                    self.apply_to_spot(&mut guard, other);
                }
            }
        }
    }

    /// Apply a spot-scoped event. Caller holds the spot's write lock.
    pub fn apply_to_spot(&self, ss: &mut SpotState, event: &Event) {
        match event {
            Event::SpotDeactivated { .. } => {
                if ss.spot.active {
                    ss.spot.active = false;
                    drop_one(&self.active_spots, &ss.spot.supplier_id);
                }
            }
            Event::WindowPublished { id, spot_id, span } => {
                ss.insert_window(Window::open(*id, *spot_id, *span));
                self.window_to_spot.insert(*id, *spot_id);
            }
            Event::WindowReleased { id, .. } => {
                if let Some(w) = ss.window_mut(id) {
                    w.release();
                }
            }
            Event::BookingCreated {
                id,
                spot_id,
                window_id,
                consumer_id,
                span,
                total_price,
                created_at,
            } => {
                if let Some(w) = ss.window_mut(window_id) {
                    w.booked = true;
                    w.booked_by = Some(*consumer_id);
                    w.booking_id = Some(*id);
                }
                ss.bookings.insert(
                    *id,
                    Booking {
                        id: *id,
                        consumer_id: *consumer_id,
                        spot_id: *spot_id,
                        window_id: *window_id,
                        span: *span,
                        total_price: *total_price,
                        status: BookingStatus::Pending,
                        payment: PaymentStatus::Unpaid,
                        created_at: *created_at,
                    },
                );
                self.booking_to_spot.insert(*id, *spot_id);
                self.consumer_bookings.entry(*consumer_id).or_default().push(*id);
                bump(&self.active_bookings, *consumer_id);
            }
            Event::BookingConfirmed { id, .. } => {
                if let Some(b) = ss.bookings.get_mut(id)
                    && b.status == BookingStatus::Pending
                {
                    b.status = BookingStatus::Confirmed;
                    b.payment = PaymentStatus::Paid;
                }
            }
            Event::BookingCompleted { id, .. } => {
                if let Some(b) = ss.bookings.get_mut(id)
                    && b.status == BookingStatus::Confirmed
                {
                    b.status = BookingStatus::Completed;
                    drop_one(&self.active_bookings, &b.consumer_id);
                }
            }
            Event::BookingCancelled { id, .. } => {
                let Some(b) = ss.bookings.get_mut(id) else { return };
                if !b.status.is_active() {
                    return;
                }
                b.status = BookingStatus::Cancelled;
                drop_one(&self.active_bookings, &b.consumer_id);
                let window_id = b.window_id;
                // The window may have been released and rebooked since.
                if let Some(w) = ss.window_mut(&window_id)
                    && w.booking_id == Some(*id)
                {
                    w.release();
                }
            }
            Event::SpotCreated { .. }
            | Event::SubscriptionCreated { .. }
            | Event::SubscriptionDeactivated { .. } => {}
        }
    }
}

/// Caller holds the subscription's mutex.
pub fn apply_to_subscription(sub: &mut Subscription, event: &Event) {
    if let Event::SubscriptionDeactivated { id } = event
        && sub.id == *id
    {
        sub.active = false;
    }
}
