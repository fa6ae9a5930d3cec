use futures::future::join_all;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::clock::{local_date, local_datetime, time_of_day};
use crate::model::*;
use crate::notify::Notifier;
use crate::observability;

use super::store::apply_to_subscription;
use super::{Engine, EngineError};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Already fired by a concurrent dispatch, or gone.
    pub skipped: usize,
}

enum Delivery {
    Delivered,
    Failed,
    Skipped,
}

/// The message a subscriber receives for a newly published window.
pub fn alert_text(offer: &WindowView, offset: chrono::FixedOffset) -> String {
    let fmt = |ms: Ms, pattern: &str| {
        local_datetime(ms, offset).map_or_else(|| ms.to_string(), |dt| dt.format(pattern).to_string())
    };
    let mut text = format!(
        "Spot {} is free {} {}-{} at {:.2}/h",
        offer.spot_label,
        fmt(offer.start, "%Y-%m-%d"),
        fmt(offer.start, "%H:%M"),
        fmt(offer.end, "%H:%M"),
        offer.price_per_hour,
    );
    if let Some(address) = &offer.address {
        text.push_str(&format!(", {address}"));
    }
    text.push_str(&format!(" (window {})", offer.window_id));
    text
}

impl Engine {
    /// Register interest in future windows. No `spot_id` means any spot.
    pub async fn subscribe(
        &self,
        id: Ulid,
        consumer_id: Ulid,
        request: SubscriptionRequest,
    ) -> Result<Ulid, EngineError> {
        if !request.bounds.is_valid() {
            return Err(EngineError::InvalidInterval);
        }
        if let Some(spot_id) = request.spot_id
            && !self.store.contains_spot(&spot_id)
        {
            return Err(EngineError::NotFound(spot_id));
        }
        let _gate = self.commit_gate.read().await;
        if self.store.get_subscription(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::SubscriptionCreated {
            id,
            consumer_id,
            spot_id: request.spot_id,
            desired_date: request.desired_date,
            bounds: request.bounds,
            created_at: self.clock.now(),
        };
        self.wal_append(&event).await?;
        self.store.apply_event(&event);
        Ok(id)
    }

    /// Deactivate a subscription. Returns false if it does not exist.
    pub async fn unsubscribe(&self, id: Ulid) -> Result<bool, EngineError> {
        let Some(sub) = self.store.get_subscription(&id) else {
            return Ok(false);
        };
        let _gate = self.commit_gate.read().await;
        let mut guard = sub.lock().await;
        if guard.active {
            let event = Event::SubscriptionDeactivated { id };
            self.wal_append(&event).await?;
            apply_to_subscription(&mut guard, &event);
        }
        Ok(true)
    }

    pub async fn get_subscription(&self, id: &Ulid) -> Result<Subscription, EngineError> {
        let sub = self.store.get_subscription(id).ok_or(EngineError::NotFound(*id))?;
        let guard = sub.lock().await;
        Ok(guard.clone())
    }

    /// Active subscriptions of one consumer, newest first.
    pub async fn subscriptions_of(&self, consumer_id: &Ulid) -> Vec<Subscription> {
        let mut subs = Vec::new();
        for sub in self.store.all_subscriptions() {
            let guard = sub.lock().await;
            if guard.active && guard.consumer_id == *consumer_id {
                subs.push(guard.clone());
            }
        }
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        subs
    }

    /// Active subscriptions interested in a slot on `spot_id` covering `span`.
    pub async fn match_subscriptions(&self, spot_id: Ulid, span: Span) -> Vec<Subscription> {
        let offset = self.config.utc_offset;
        let (Some(date), Some(start), Some(end)) = (
            local_date(span.start, offset),
            time_of_day(span.start, offset),
            time_of_day(span.end, offset),
        ) else {
            return Vec::new();
        };
        let mut matched = Vec::new();
        for sub in self.store.all_subscriptions() {
            let guard = sub.lock().await;
            if guard.matches(spot_id, date, start, end) {
                matched.push(guard.clone());
            }
        }
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matched
    }

    /// Send `text` to every matched subscriber concurrently. A subscription
    /// is deactivated only after its delivery succeeded. While a send is in
    /// flight the subscription is marked `sending`, so a concurrent dispatch
    /// skips it and the alert goes out at most once.
    pub async fn dispatch(
        &self,
        matched: &[Subscription],
        text: &str,
        notifier: &dyn Notifier,
    ) -> DispatchReport {
        let outcomes = join_all(matched.iter().map(|s| self.deliver_once(s.id, text, notifier))).await;
        let mut report = DispatchReport::default();
        for outcome in outcomes {
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Skipped => report.skipped += 1,
            }
        }
        metrics::counter!(observability::ALERTS_DELIVERED_TOTAL).increment(report.delivered as u64);
        metrics::counter!(observability::ALERTS_FAILED_TOTAL).increment(report.failed as u64);
        report
    }

    async fn deliver_once(&self, id: Ulid, text: &str, notifier: &dyn Notifier) -> Delivery {
        let Some(sub) = self.store.get_subscription(&id) else {
            return Delivery::Skipped;
        };
        let consumer_id = {
            let mut guard = sub.lock().await;
            if !guard.active || guard.sending {
                return Delivery::Skipped;
            }
            guard.sending = true;
            guard.consumer_id
        };

        // No lock is held across the send.
        if let Err(e) = notifier.send(consumer_id, text).await {
            warn!("alert for subscription {id} not delivered: {e}");
            sub.lock().await.sending = false;
            return Delivery::Failed;
        }

        let _gate = self.commit_gate.read().await;
        let mut guard = sub.lock().await;
        guard.sending = false;
        if guard.active {
            let event = Event::SubscriptionDeactivated { id };
            if let Err(e) = self.wal_append(&event).await {
                // Delivered already; keep it from firing again in this process.
                error!("subscription {id} fired but deactivation not persisted: {e}");
            }
            apply_to_subscription(&mut guard, &event);
        }
        Delivery::Delivered
    }

    /// Match a published window against subscriptions and alert the matches.
    pub async fn notify_window(
        &self,
        window_id: Ulid,
        notifier: &dyn Notifier,
    ) -> Result<DispatchReport, EngineError> {
        let offer = self.get_window(&window_id).await?;
        let matched = self.match_subscriptions(offer.spot_id, offer.span()).await;
        if matched.is_empty() {
            return Ok(DispatchReport::default());
        }
        let text = alert_text(&offer, self.config.utc_offset);
        let report = self.dispatch(&matched, &text, notifier).await;
        info!(
            "window {window_id}: {} alerts delivered, {} failed, {} skipped",
            report.delivered, report.failed, report.skipped
        );
        Ok(report)
    }
}
