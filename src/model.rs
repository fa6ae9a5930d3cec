use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Optional clock-time bounds. Only the time-of-day component is compared;
/// there is no calendar awareness, so a slot crossing midnight is compared
/// literally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub from: Option<NaiveTime>,
    pub to: Option<NaiveTime>,
}

impl TimeBounds {
    pub fn new(from: Option<NaiveTime>, to: Option<NaiveTime>) -> Self {
        Self { from, to }
    }

    pub fn is_valid(&self) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        }
    }

    /// `from` alone: slot starts at or after it. `to` alone: slot ends at or
    /// before it. Both: slot fits inside.
    pub fn admits(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.from.is_none_or(|from| from <= start) && self.to.is_none_or(|to| end <= to)
    }
}

// ── Spots & windows ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spot {
    pub id: Ulid,
    pub supplier_id: Ulid,
    pub label: String,
    pub address: Option<String>,
    pub price_per_hour: Decimal,
    pub partial_allowed: bool,
    /// Where the supplier wants to be paid; shown on offers.
    pub payout: Option<String>,
    pub active: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone)]
pub struct NewSpot {
    pub supplier_id: Ulid,
    pub label: String,
    pub address: Option<String>,
    pub price_per_hour: Decimal,
    pub partial_allowed: bool,
    pub payout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub span: Span,
    pub booked: bool,
    pub booked_by: Option<Ulid>,
    pub booking_id: Option<Ulid>,
}

impl Window {
    pub fn open(id: Ulid, spot_id: Ulid, span: Span) -> Self {
        Self {
            id,
            spot_id,
            span,
            booked: false,
            booked_by: None,
            booking_id: None,
        }
    }

    /// Clear the claim. Returns false if the window was already free.
    pub fn release(&mut self) -> bool {
        let was_booked = self.booked;
        self.booked = false;
        self.booked_by = None;
        self.booking_id = None;
        was_booked
    }
}

// ── Bookings ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and confirmed bookings count against the consumer's limit.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub consumer_id: Ulid,
    pub spot_id: Ulid,
    pub window_id: Ulid,
    pub span: Span,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub payment: PaymentStatus,
    pub created_at: Ms,
}

impl Booking {
    /// Paid and not cancelled: counts as revenue.
    pub fn is_earned(&self) -> bool {
        self.payment == PaymentStatus::Paid && self.status != BookingStatus::Cancelled
    }
}

// ── Subscriptions ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub spot_id: Option<Ulid>,
    pub desired_date: Option<NaiveDate>,
    pub bounds: TimeBounds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: Ulid,
    pub consumer_id: Ulid,
    pub spot_id: Option<Ulid>,
    /// True iff no target spot was given.
    pub notify_any: bool,
    pub desired_date: Option<NaiveDate>,
    pub bounds: TimeBounds,
    pub active: bool,
    pub created_at: Ms,
    /// An alert is on its way. Not persisted.
    pub sending: bool,
}

impl Subscription {
    /// Whether a new slot on `spot_id`, starting on local `date` between the
    /// clock times `start` and `end`, should alert this subscriber.
    pub fn matches(&self, spot_id: Ulid, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.active
            && (self.notify_any || self.spot_id == Some(spot_id))
            && self.desired_date.is_none_or(|d| d == date)
            && self.bounds.admits(start, end)
    }
}

// ── Per-spot state ──────────────────────────────────────────────

/// Everything that must change atomically for one spot: the spot row, its
/// windows and the bookings made against them. Guarded by one RwLock.
#[derive(Debug, Clone)]
pub struct SpotState {
    pub spot: Spot,
    /// Sorted by `span.start`.
    pub windows: Vec<Window>,
    pub bookings: HashMap<Ulid, Booking>,
}

impl SpotState {
    pub fn new(spot: Spot) -> Self {
        Self {
            spot,
            windows: Vec::new(),
            bookings: HashMap::new(),
        }
    }

    /// Insert window maintaining sort order by span.start.
    pub fn insert_window(&mut self, window: Window) {
        let pos = self
            .windows
            .binary_search_by_key(&window.span.start, |w| w.span.start)
            .unwrap_or_else(|e| e);
        self.windows.insert(pos, window);
    }

    pub fn window(&self, id: &Ulid) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == *id)
    }

    pub fn window_mut(&mut self, id: &Ulid) -> Option<&mut Window> {
        self.windows.iter_mut().find(|w| w.id == *id)
    }

    /// Windows that are unbooked and not yet over at `now`.
    pub fn open_windows(&self, now: Ms) -> impl Iterator<Item = &Window> {
        self.windows.iter().filter(move |w| !w.booked && w.span.end > now)
    }
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpotCreated {
        id: Ulid,
        supplier_id: Ulid,
        label: String,
        address: Option<String>,
        price_per_hour: Decimal,
        partial_allowed: bool,
        payout: Option<String>,
        created_at: Ms,
    },
    SpotDeactivated {
        id: Ulid,
    },
    WindowPublished {
        id: Ulid,
        spot_id: Ulid,
        span: Span,
    },
    WindowReleased {
        id: Ulid,
        spot_id: Ulid,
    },
    /// Inserts the booking and claims its window in one record.
    BookingCreated {
        id: Ulid,
        spot_id: Ulid,
        window_id: Ulid,
        consumer_id: Ulid,
        span: Span,
        total_price: Decimal,
        created_at: Ms,
    },
    BookingConfirmed {
        id: Ulid,
        spot_id: Ulid,
    },
    BookingCompleted {
        id: Ulid,
        spot_id: Ulid,
    },
    /// Cancels the booking and releases its window in one record.
    BookingCancelled {
        id: Ulid,
        spot_id: Ulid,
    },
    SubscriptionCreated {
        id: Ulid,
        consumer_id: Ulid,
        spot_id: Option<Ulid>,
        desired_date: Option<NaiveDate>,
        bounds: TimeBounds,
        created_at: Ms,
    },
    SubscriptionDeactivated {
        id: Ulid,
    },
}

impl Event {
    /// The spot whose lock guards this event, if any.
    pub fn spot_id(&self) -> Option<Ulid> {
        match self {
            Event::SpotCreated { id, .. } | Event::SpotDeactivated { id } => Some(*id),
            Event::WindowPublished { spot_id, .. }
            | Event::WindowReleased { spot_id, .. }
            | Event::BookingCreated { spot_id, .. }
            | Event::BookingConfirmed { spot_id, .. }
            | Event::BookingCompleted { spot_id, .. }
            | Event::BookingCancelled { spot_id, .. } => Some(*spot_id),
            Event::SubscriptionCreated { .. } | Event::SubscriptionDeactivated { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A bookable window joined with what a consumer needs to see the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowView {
    pub window_id: Ulid,
    pub spot_id: Ulid,
    pub supplier_id: Ulid,
    pub spot_label: String,
    pub address: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub booked: bool,
    pub price_per_hour: Decimal,
    pub partial_allowed: bool,
    pub payout: Option<String>,
}

impl WindowView {
    pub fn from_parts(spot: &Spot, window: &Window) -> Self {
        Self {
            window_id: window.id,
            spot_id: spot.id,
            supplier_id: spot.supplier_id,
            spot_label: spot.label.clone(),
            address: spot.address.clone(),
            start: window.span.start,
            end: window.span.end,
            booked: window.booked,
            price_per_hour: spot.price_per_hour,
            partial_allowed: spot.partial_allowed,
            payout: spot.payout.clone(),
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub date: Option<NaiveDate>,
    pub bounds: TimeBounds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub window_id: Ulid,
    pub total_price: Decimal,
    pub duration_hours: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub booking_id: Ulid,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_spots: usize,
    pub active_spots: usize,
    pub total_windows: usize,
    pub open_windows: usize,
    pub total_bookings: usize,
    pub pending_bookings: usize,
    pub confirmed_bookings: usize,
    pub cancelled_bookings: usize,
    pub completed_bookings: usize,
    pub bookings_today: usize,
    pub revenue: Decimal,
    pub active_subscriptions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStatistics {
    pub user_id: Ulid,
    pub total_bookings: usize,
    pub active_spots: usize,
    pub total_spent: Decimal,
    pub total_earned: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn spot_state() -> SpotState {
        SpotState::new(Spot {
            id: Ulid::new(),
            supplier_id: Ulid::new(),
            label: "A-1".into(),
            address: None,
            price_per_hour: Decimal::from(100),
            partial_allowed: true,
            payout: None,
            active: true,
            created_at: 0,
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn bounds_lower_only() {
        let b = TimeBounds::new(Some(t(9, 0)), None);
        assert!(b.admits(t(9, 0), t(10, 0)));
        assert!(b.admits(t(14, 0), t(23, 0)));
        assert!(!b.admits(t(8, 59), t(10, 0)));
    }

    #[test]
    fn bounds_upper_only() {
        let b = TimeBounds::new(None, Some(t(18, 0)));
        assert!(b.admits(t(6, 0), t(18, 0)));
        assert!(!b.admits(t(17, 0), t(18, 1)));
    }

    #[test]
    fn bounds_both_require_fit() {
        let b = TimeBounds::new(Some(t(9, 0)), Some(t(18, 0)));
        assert!(b.admits(t(10, 0), t(12, 0)));
        assert!(!b.admits(t(8, 0), t(12, 0)));
        assert!(!b.admits(t(10, 0), t(19, 0)));
        assert!(TimeBounds::default().admits(t(0, 0), t(23, 59)));
    }

    #[test]
    fn bounds_compare_clock_time_only() {
        // 22:00 → 02:00 next day: end clock time is before the upper bound.
        let b = TimeBounds::new(Some(t(21, 0)), Some(t(23, 0)));
        assert!(b.admits(t(22, 0), t(2, 0)));
    }

    #[test]
    fn bounds_validity() {
        assert!(TimeBounds::new(Some(t(9, 0)), Some(t(9, 0))).is_valid());
        assert!(!TimeBounds::new(Some(t(10, 0)), Some(t(9, 0))).is_valid());
    }

    #[test]
    fn subscription_matching() {
        let spot = Ulid::new();
        let other = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let mut sub = Subscription {
            id: Ulid::new(),
            consumer_id: Ulid::new(),
            spot_id: Some(spot),
            notify_any: false,
            desired_date: Some(date),
            bounds: TimeBounds::default(),
            active: true,
            created_at: 0,
            sending: false,
        };
        assert!(sub.matches(spot, date, t(10, 0), t(12, 0)));
        assert!(!sub.matches(other, date, t(10, 0), t(12, 0)));
        assert!(!sub.matches(spot, date.succ_opt().unwrap(), t(10, 0), t(12, 0)));

        sub.notify_any = true;
        sub.spot_id = None;
        assert!(sub.matches(other, date, t(10, 0), t(12, 0)));

        sub.active = false;
        assert!(!sub.matches(other, date, t(10, 0), t(12, 0)));
    }

    #[test]
    fn window_ordering() {
        let mut ss = spot_state();
        let spot_id = ss.spot.id;
        for start in [300, 100, 200] {
            ss.insert_window(Window::open(Ulid::new(), spot_id, Span::new(start, start + 50)));
        }
        let starts: Vec<Ms> = ss.windows.iter().map(|w| w.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn window_release_reports_change() {
        let mut w = Window::open(Ulid::new(), Ulid::new(), Span::new(0, 10));
        assert!(!w.release());
        w.booked = true;
        w.booked_by = Some(Ulid::new());
        w.booking_id = Some(Ulid::new());
        assert!(w.release());
        assert_eq!(w, Window { booked: false, booked_by: None, booking_id: None, ..w.clone() });
    }

    #[test]
    fn open_windows_skip_booked_and_past() {
        let mut ss = spot_state();
        let spot_id = ss.spot.id;
        ss.insert_window(Window::open(Ulid::new(), spot_id, Span::new(0, 100)));
        let mut booked = Window::open(Ulid::new(), spot_id, Span::new(200, 300));
        booked.booked = true;
        ss.insert_window(booked);
        let open_id = Ulid::new();
        ss.insert_window(Window::open(open_id, spot_id, Span::new(400, 500)));

        let open: Vec<_> = ss.open_windows(150).map(|w| w.id).collect();
        assert_eq!(open, vec![open_id]);
    }

    #[test]
    fn booking_status_parse_and_activity() {
        assert_eq!("pending".parse::<BookingStatus>(), Ok(BookingStatus::Pending));
        assert_eq!("CANCELLED".parse::<BookingStatus>(), Ok(BookingStatus::Cancelled));
        assert!("lost".parse::<BookingStatus>().is_err());
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
        assert!(!BookingStatus::Completed.is_active());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            spot_id: Ulid::new(),
            window_id: Ulid::new(),
            consumer_id: Ulid::new(),
            span: Span::new(1000, 2000),
            total_price: Decimal::new(2550, 2),
            created_at: 42,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);

        let sub = Event::SubscriptionCreated {
            id: Ulid::new(),
            consumer_id: Ulid::new(),
            spot_id: None,
            desired_date: NaiveDate::from_ymd_opt(2026, 10, 20),
            bounds: TimeBounds::new(Some(t(9, 0)), None),
            created_at: 7,
        };
        let bytes = bincode::serialize(&sub).unwrap();
        assert_eq!(bincode::deserialize::<Event>(&bytes).unwrap(), sub);
    }
}
