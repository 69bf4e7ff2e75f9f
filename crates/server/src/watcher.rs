//! Periodic re-fetch of one negotiation thread, publishing only when it moved.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use gemsource_core::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus};
use gemsource_db::repositories::NegotiationRepository;

/// What a subscriber compares to decide whether a re-render is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    rounds: usize,
    status: NegotiationStatus,
}

impl Fingerprint {
    fn of(negotiation: &Negotiation) -> Self {
        Self { rounds: negotiation.rounds.len(), status: negotiation.status }
    }
}

pub struct NegotiationWatcher {
    negotiations: Arc<dyn NegotiationRepository>,
    period: Duration,
}

impl NegotiationWatcher {
    pub fn new(negotiations: Arc<dyn NegotiationRepository>, period: Duration) -> Self {
        Self { negotiations, period: period.max(Duration::from_millis(1)) }
    }

    /// Starts polling. The first successful fetch is always published.
    pub fn watch(&self, negotiation_id: NegotiationId) -> NegotiationWatch {
        let (updates_tx, updates_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(poll(
            self.negotiations.clone(),
            negotiation_id,
            self.period,
            updates_tx,
            stop_rx,
        ));

        NegotiationWatch { updates: updates_rx, stop: Some(stop_tx), task }
    }
}

/// Handle to a running watch. Dropping it stops the task at its next tick.
pub struct NegotiationWatch {
    updates: watch::Receiver<Option<Negotiation>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NegotiationWatch {
    pub fn subscribe(&self) -> watch::Receiver<Option<Negotiation>> {
        self.updates.clone()
    }

    pub fn latest(&self) -> Option<Negotiation> {
        self.updates.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops polling and waits for the task to exit.
    pub async fn cancel(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Waits for the task to end on its own, which happens after a terminal status.
    pub async fn finished(mut self) {
        let _ = (&mut self.task).await;
    }
}

async fn poll(
    negotiations: Arc<dyn NegotiationRepository>,
    negotiation_id: NegotiationId,
    period: Duration,
    updates: watch::Sender<Option<Negotiation>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut published: Option<Fingerprint> = None;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let negotiation = match negotiations.find_by_id(&negotiation_id).await {
            Ok(Some(negotiation)) => negotiation,
            Ok(None) => {
                debug!(
                    event_name = "negotiation.watch.missing",
                    negotiation_id = %negotiation_id,
                    "watched negotiation not found"
                );
                continue;
            }
            Err(error) => {
                warn!(
                    event_name = "negotiation.watch.fetch_failed",
                    negotiation_id = %negotiation_id,
                    error = %error,
                    "negotiation re-fetch failed; retrying next tick"
                );
                continue;
            }
        };

        let fingerprint = Fingerprint::of(&negotiation);
        if published == Some(fingerprint) {
            continue;
        }
        published = Some(fingerprint);
        updates.send_replace(Some(negotiation));

        if fingerprint.status.is_terminal() {
            info!(
                event_name = "negotiation.watch.terminal",
                negotiation_id = %negotiation_id,
                status = fingerprint.status.as_str(),
                "negotiation reached a terminal status; watch ended"
            );
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use gemsource_core::domain::cart::{CartId, CartItemId};
    use gemsource_core::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus, Party};
    use gemsource_core::domain::quotation::{Quotation, QuotationId, QuotationItem};
    use gemsource_core::negotiation::{NegotiationCommand, NegotiationEngine, ProposedLine};
    use gemsource_db::repositories::{InMemoryNegotiationRepository, NegotiationRepository};

    use super::NegotiationWatcher;

    const WAIT: Duration = Duration::from_secs(2);

    fn quotation() -> Quotation {
        let at = Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).single().expect("timestamp");
        let mut quotation = Quotation::new_draft(
            QuotationId("quo-watch".to_string()),
            CartId("cart-watch".to_string()),
            vec![QuotationItem::new(CartItemId("ci-1".to_string()), Decimal::new(100, 0), 5)],
            "sales-1",
            at,
        )
        .expect("quotation");
        quotation.send(at, ChronoDuration::days(7)).expect("send");
        quotation
    }

    async fn seeded() -> (Arc<InMemoryNegotiationRepository>, Quotation, Negotiation) {
        let repo = Arc::new(InMemoryNegotiationRepository::default());
        let quotation = quotation();
        let negotiation = NegotiationEngine::new()
            .open(NegotiationId("neg-watch".to_string()), &quotation, Party::Buyer, Utc::now())
            .expect("open");
        repo.save(negotiation.clone()).await.expect("save");
        (repo, quotation, negotiation)
    }

    #[tokio::test]
    async fn publishes_initial_snapshot_then_only_changes() {
        let (repo, quotation, mut negotiation) = seeded().await;
        let watch = NegotiationWatcher::new(repo.clone(), Duration::from_millis(10))
            .watch(negotiation.id.clone());
        let mut updates = watch.subscribe();

        tokio::time::timeout(WAIT, updates.changed()).await.expect("initial publish").expect("open");
        assert_eq!(updates.borrow_and_update().as_ref().map(|n| n.rounds.len()), Some(1));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!updates.has_changed().expect("sender alive"), "unchanged thread is not republished");

        NegotiationEngine::new()
            .apply(
                &mut negotiation,
                &quotation,
                NegotiationCommand::Counter {
                    party: Party::Buyer,
                    proposer_id: "buyer-1".to_string(),
                    lines: vec![ProposedLine::new(
                        CartItemId("ci-1".to_string()),
                        Decimal::new(90, 0),
                        5,
                    )],
                    message: None,
                },
                Utc::now(),
            )
            .expect("counter");
        repo.save(negotiation).await.expect("save counter");

        tokio::time::timeout(WAIT, updates.changed()).await.expect("counter publish").expect("open");
        let latest = updates.borrow_and_update().clone().expect("snapshot");
        assert_eq!(latest.rounds.len(), 2);
        assert_eq!(latest.status, NegotiationStatus::CounterBuyer);

        watch.cancel().await;
    }

    #[tokio::test]
    async fn terminal_status_ends_the_watch() {
        let (repo, quotation, mut negotiation) = seeded().await;
        NegotiationEngine::new()
            .apply(
                &mut negotiation,
                &quotation,
                NegotiationCommand::Close { party: Party::Seller, reason: None },
                Utc::now(),
            )
            .expect("close");
        repo.save(negotiation.clone()).await.expect("save closed");

        let watch = NegotiationWatcher::new(repo, Duration::from_millis(10)).watch(negotiation.id);
        let updates = watch.subscribe();

        tokio::time::timeout(WAIT, watch.finished()).await.expect("watch ends on terminal status");
        assert_eq!(
            updates.borrow().as_ref().map(|negotiation| negotiation.status),
            Some(NegotiationStatus::Closed)
        );
    }

    #[tokio::test]
    async fn cancel_stops_polling() {
        let (repo, _, negotiation) = seeded().await;
        let watch = NegotiationWatcher::new(repo, Duration::from_secs(3600)).watch(negotiation.id);

        tokio::time::timeout(WAIT, watch.cancel()).await.expect("cancel returns promptly");
    }
}
