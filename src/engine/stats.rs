use rust_decimal::Decimal;
use ulid::Ulid;

use crate::clock::local_date;
use crate::model::*;

use super::Engine;

impl Engine {
    /// System-wide counts. "Today" is the current calendar date in the
    /// service time zone, judged by booking creation time.
    ///
    /// Revenue sums paid bookings that were not cancelled, so completed
    /// bookings still count: the sweeper moves confirmed bookings on to
    /// completed once their slot ends, and that money was still earned.
    pub async fn statistics(&self) -> Statistics {
        let now = self.clock.now();
        let offset = self.config.utc_offset;
        let today = local_date(now, offset);
        let mut stats = Statistics::default();

        for ss in self.store.all_spots() {
            let guard = ss.read().await;
            stats.total_spots += 1;
            if guard.spot.active {
                stats.active_spots += 1;
                stats.open_windows += guard.open_windows(now).count();
            }
            stats.total_windows += guard.windows.len();

            for b in guard.bookings.values() {
                stats.total_bookings += 1;
                match b.status {
                    BookingStatus::Pending => stats.pending_bookings += 1,
                    BookingStatus::Confirmed => stats.confirmed_bookings += 1,
                    BookingStatus::Cancelled => stats.cancelled_bookings += 1,
                    BookingStatus::Completed => stats.completed_bookings += 1,
                }
                if b.is_earned() {
                    stats.revenue += b.total_price;
                }
                if today.is_some() && local_date(b.created_at, offset) == today {
                    stats.bookings_today += 1;
                }
            }
        }
        for sub in self.store.all_subscriptions() {
            if sub.lock().await.active {
                stats.active_subscriptions += 1;
            }
        }
        stats
    }

    /// Per-user view: bookings and spend as a consumer, spots and earnings
    /// as a supplier.
    pub async fn user_statistics(&self, user_id: Ulid) -> UserStatistics {
        let bookings = self.bookings_of_consumer(&user_id, None).await;
        let total_spent = bookings
            .iter()
            .filter(|b| b.is_earned())
            .map(|b| b.total_price)
            .sum::<Decimal>();

        let mut total_earned = Decimal::ZERO;
        for ss in self.store.spots_of_supplier(&user_id) {
            let guard = ss.read().await;
            total_earned += guard
                .bookings
                .values()
                .filter(|b| b.is_earned())
                .map(|b| b.total_price)
                .sum::<Decimal>();
        }

        UserStatistics {
            user_id,
            total_bookings: bookings.len(),
            active_spots: self.store.active_spot_count(&user_id) as usize,
            total_spent,
            total_earned,
        }
    }
}
