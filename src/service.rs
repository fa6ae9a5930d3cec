use std::sync::Arc;

use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::{Alert, Notifier, NotifyHub};

/// Who is asking. Identity is established by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Ulid,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: Ulid) -> Self {
        Self { user_id, is_admin: false }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self { user_id, is_admin: true }
    }
}

fn allow(ok: bool, what: &'static str) -> Result<(), EngineError> {
    if ok { Ok(()) } else { Err(EngineError::Forbidden(what)) }
}

/// Caller-facing operations: ids are minted here, ownership is checked here,
/// and side effects (alerts) are triggered here. The engine below trusts its
/// arguments.
pub struct Service {
    engine: Arc<Engine>,
    hub: Arc<NotifyHub>,
}

impl Service {
    pub fn new(engine: Arc<Engine>, hub: Arc<NotifyHub>) -> Self {
        Self { engine, hub }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    // ── Suppliers ────────────────────────────────────────────

    pub async fn list_spot(
        &self,
        caller: Caller,
        mut spot: NewSpot,
    ) -> Result<Ulid, EngineError> {
        spot.supplier_id = caller.user_id;
        let id = Ulid::new();
        self.engine.create_spot(id, spot).await?;
        Ok(id)
    }

    pub async fn remove_spot(&self, caller: Caller, spot_id: Ulid) -> Result<bool, EngineError> {
        let spot = match self.engine.spot(&spot_id).await {
            Ok(spot) => spot,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        allow(caller.is_admin || spot.supplier_id == caller.user_id, "not your spot")?;
        self.engine.deactivate_spot(spot_id).await
    }

    /// Publish a window and alert matching subscribers. Alert failures are
    /// logged, never returned: the window is already published.
    pub async fn publish_window(
        &self,
        caller: Caller,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Ulid, EngineError> {
        let spot = self.engine.spot(&spot_id).await?;
        allow(caller.is_admin || spot.supplier_id == caller.user_id, "not your spot")?;
        let id = self.engine.publish_window(Ulid::new(), spot_id, start, end).await?;
        if let Err(e) = self.engine.notify_window(id, self.hub.as_ref()).await {
            warn!("matching for window {id} failed: {e}");
        }
        Ok(id)
    }

    pub async fn release_window(&self, caller: Caller, window_id: Ulid) -> Result<(), EngineError> {
        let view = self.engine.get_window(&window_id).await?;
        allow(caller.is_admin || view.supplier_id == caller.user_id, "not your window")?;
        self.engine.release_window(window_id).await
    }

    pub async fn my_spots(&self, caller: Caller) -> Vec<Spot> {
        self.engine.spots_of_supplier(&caller.user_id).await
    }

    // ── Consumers ────────────────────────────────────────────

    pub async fn search(&self, filter: &SearchFilter) -> Vec<WindowView> {
        self.engine.search(filter).await
    }

    pub async fn window(&self, window_id: Ulid) -> Result<WindowView, EngineError> {
        self.engine.get_window(&window_id).await
    }

    pub async fn quote(&self, window_id: Ulid) -> Result<Quote, EngineError> {
        self.engine.quote(window_id).await
    }

    /// Every window of a spot, booked or not, oldest start first.
    pub async fn spot_windows(&self, spot_id: Ulid) -> Result<Vec<WindowView>, EngineError> {
        self.engine.windows_of_spot(&spot_id).await
    }

    /// Book a window and tell the supplier about it.
    pub async fn book(&self, caller: Caller, window_id: Ulid) -> Result<BookingReceipt, EngineError> {
        let receipt = self
            .engine
            .create_booking(Ulid::new(), caller.user_id, window_id)
            .await?;
        if let Ok(view) = self.engine.get_window(&window_id).await {
            let text = format!(
                "Spot {} booked for {} (booking {})",
                view.spot_label, receipt.total_price, receipt.booking_id
            );
            if let Err(e) = self.hub.send(view.supplier_id, &text).await {
                warn!("supplier not told about booking {}: {e}", receipt.booking_id);
            }
        }
        Ok(receipt)
    }

    /// Pay for one's own pending booking.
    pub async fn pay(&self, caller: Caller, booking_id: Ulid) -> Result<bool, EngineError> {
        let booking = self.engine.get_booking(&booking_id).await?;
        allow(caller.is_admin || booking.consumer_id == caller.user_id, "not your booking")?;
        self.engine.confirm_payment(booking_id).await
    }

    /// The consumer, the spot's supplier, or an admin may cancel.
    pub async fn cancel(&self, caller: Caller, booking_id: Ulid) -> Result<bool, EngineError> {
        let booking = match self.engine.get_booking(&booking_id).await {
            Ok(b) => b,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let supplier_id = self.engine.spot(&booking.spot_id).await?.supplier_id;
        allow(
            caller.is_admin || booking.consumer_id == caller.user_id || supplier_id == caller.user_id,
            "not your booking",
        )?;
        let cancelled = self.engine.cancel_booking(booking_id).await?;
        if cancelled {
            info!("booking {booking_id} cancelled by {}", caller.user_id);
        }
        Ok(cancelled)
    }

    pub async fn my_bookings(&self, caller: Caller, status: Option<BookingStatus>) -> Vec<Booking> {
        self.engine.bookings_of_consumer(&caller.user_id, status).await
    }

    pub async fn incoming_bookings(&self, caller: Caller) -> Vec<Booking> {
        self.engine.bookings_of_supplier(&caller.user_id).await
    }

    // ── Subscriptions & alerts ───────────────────────────────

    pub async fn subscribe(
        &self,
        caller: Caller,
        request: SubscriptionRequest,
    ) -> Result<Ulid, EngineError> {
        self.engine.subscribe(Ulid::new(), caller.user_id, request).await
    }

    pub async fn unsubscribe(&self, caller: Caller, id: Ulid) -> Result<bool, EngineError> {
        let sub = match self.engine.get_subscription(&id).await {
            Ok(sub) => sub,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        allow(caller.is_admin || sub.consumer_id == caller.user_id, "not your subscription")?;
        self.engine.unsubscribe(id).await
    }

    pub async fn my_subscriptions(&self, caller: Caller) -> Vec<Subscription> {
        self.engine.subscriptions_of(&caller.user_id).await
    }

    pub fn take_alerts(&self, caller: Caller) -> Vec<Alert> {
        self.hub.drain(&caller.user_id)
    }

    // ── Statistics ───────────────────────────────────────────

    pub async fn statistics(&self, caller: Caller) -> Result<Statistics, EngineError> {
        allow(caller.is_admin, "statistics are admin only")?;
        Ok(self.engine.statistics().await)
    }

    /// Anyone may see their own numbers; admins may see anyone's.
    pub async fn user_statistics(
        &self,
        caller: Caller,
        user_id: Option<Ulid>,
    ) -> Result<UserStatistics, EngineError> {
        let user_id = user_id.unwrap_or(caller.user_id);
        allow(caller.is_admin || user_id == caller.user_id, "not your statistics")?;
        Ok(self.engine.user_statistics(user_id).await)
    }
}
