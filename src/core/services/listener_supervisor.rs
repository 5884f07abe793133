use crate::core::domain::broadcaster::BroadcasterKey;
use crate::core::domain::source_event::SourceEvent;
use crate::core::ports::event_source::EventSource;
use crate::core::ports::persistence::{DonorCredit, GiftRecord};
use crate::core::ports::runner::{RunOutcome, Runner};
use crate::core::services::aggregator::{AppliedGift, Aggregator};
use crate::core::services::fanout_hub::FanoutHub;
use crate::messaging::{PersistenceEvent, Publisher};
use crate::metrics::connection_health_tracker::ConnectionHealthTracker;
use crate::utils::backoff::Backoff;
use crate::utils::error::{RelayError, RelayResult};
use crate::utils::scheduler::schedule_with_backoff;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a listener is in its connect/reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ListenerState {
    Starting,
    Connected,
    /// Waiting to reconnect. `consecutive_failures` counts failed subscribe attempts since the
    /// last successful connection.
    #[serde(rename_all = "camelCase")]
    Disconnected { consecutive_failures: usize },
}

/// Keeps one broadcaster connected to the event source and feeds its aggregator.
///
/// Each [`Runner::run`] call is one connection session. The session forwards gifts to the
/// aggregator and publishes the results; malformed events and failed applies are logged and
/// dropped without ending the session. The scheduler restarts the supervisor with backoff
/// whenever a session ends, for as long as the cancellation token is live.
pub struct ListenerSupervisor {
    broadcaster: BroadcasterKey,
    source: Arc<dyn EventSource>,
    aggregator: Arc<Aggregator>,
    hub: Arc<FanoutHub>,
    publisher: Option<Publisher>,
    health: ConnectionHealthTracker,
    state: watch::Sender<ListenerState>,
    cancel_token: CancellationToken,
}

impl ListenerSupervisor {
    pub fn new(
        broadcaster: BroadcasterKey,
        source: Arc<dyn EventSource>,
        aggregator: Arc<Aggregator>,
        hub: Arc<FanoutHub>,
        publisher: Option<Publisher>,
        health: ConnectionHealthTracker,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Starting);
        Self {
            broadcaster,
            source,
            aggregator,
            hub,
            publisher,
            health,
            state,
            cancel_token,
        }
    }

    /// Observes state transitions.
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Starts the supervision loop on `runtime`.
    pub fn spawn(self, backoff: Backoff, runtime: &Handle) -> JoinHandle<()> {
        let name = format!("Listener[{}]", self.broadcaster);
        let cancel_token = self.cancel_token.clone();
        schedule_with_backoff(self, backoff, name, cancel_token, runtime)
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
    }

    fn handle_event(&self, event: SourceEvent) {
        match event {
            SourceEvent::Gift(gift) => match self.aggregator.apply(&gift) {
                Ok(applied) => {
                    let delivered = self.hub.publish(&applied.event);
                    debug!(
                        broadcaster = %self.broadcaster,
                        sequence = applied.event.sequence_number,
                        delivered,
                        "Gift applied"
                    );
                    self.persist(applied);
                }
                Err(e) => {
                    warn!(broadcaster = %self.broadcaster, "Dropping gift: {}", e);
                }
            },
            SourceEvent::Comment(comment) => {
                self.hub.publish_comment(&comment);
            }
        }
    }

    fn persist(&self, applied: AppliedGift) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        let credit = PersistenceEvent::DonorCredited(DonorCredit {
            broadcaster: self.broadcaster.clone(),
            donor_id: applied.donor.donor_id.clone(),
            display_name: applied.donor.display_name.clone(),
            avatar_url: applied.donor.avatar_url.clone(),
            diamonds_delta: applied.diamonds_delta,
        });
        let gift = PersistenceEvent::GiftRecorded(GiftRecord {
            broadcaster: self.broadcaster.clone(),
            donor_id: applied.event.donor_id,
            gift_name: applied.event.gift_name,
            gift_image_url: applied.event.gift_image_url,
            gift_count: applied.event.total_gift_count,
            diamonds: applied.event.total_diamonds,
            coalesced: applied.coalesced,
        });

        for event in [credit, gift] {
            if let Err(e) = publisher.publish(event) {
                debug!(broadcaster = %self.broadcaster, "Persistence notification skipped: {}", e);
            }
        }
    }
}

#[async_trait]
impl Runner for ListenerSupervisor {
    async fn run(&mut self) -> RelayResult<RunOutcome> {
        self.set_state(ListenerState::Starting);

        let subscribed = tokio::select! {
            result = self.source.subscribe(&self.broadcaster) => result,
            _ = self.cancel_token.cancelled() => return Ok(RunOutcome::Cancelled),
        };

        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                self.health.note_failure();
                self.set_state(ListenerState::Disconnected {
                    consecutive_failures: self.health.consecutive_failures(),
                });
                return Err(e);
            }
        };

        self.health.note_success();
        self.set_state(ListenerState::Connected);
        info!(broadcaster = %self.broadcaster, "Listener connected");

        loop {
            let item = tokio::select! {
                item = subscription.next() => item,
                _ = self.cancel_token.cancelled() => {
                    subscription.cancel();
                    info!(broadcaster = %self.broadcaster, "Listener cancelled");
                    return Ok(RunOutcome::Cancelled);
                }
            };

            match item {
                Some(Ok(event)) => self.handle_event(event),
                Some(Err(RelayError::MalformedEvent(reason))) => {
                    warn!(broadcaster = %self.broadcaster, "Dropping malformed event: {}", reason);
                }
                Some(Err(e)) => {
                    warn!(broadcaster = %self.broadcaster, "Source connection lost: {}", e);
                    break;
                }
                None => {
                    info!(broadcaster = %self.broadcaster, "Source closed the connection");
                    break;
                }
            }
        }

        self.set_state(ListenerState::Disconnected {
            consecutive_failures: 0,
        });
        Ok(RunOutcome::Established)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::gift::RawGiftEvent;
    use crate::core::ports::event_source::SourceSubscription;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Hands out pre-scripted subscriptions; fails once the script runs out.
    struct ScriptedSource {
        scripts: Mutex<Vec<Vec<RelayResult<SourceEvent>>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Vec<RelayResult<SourceEvent>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().rev().collect()),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn subscribe(
            &self,
            _broadcaster: &BroadcasterKey,
        ) -> RelayResult<SourceSubscription> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop();
            match script {
                Some(events) => {
                    let (tx, rx) = mpsc::channel(events.len().max(1));
                    for event in events {
                        tx.try_send(event).unwrap();
                    }
                    Ok(SourceSubscription::new(rx, CancellationToken::new()))
                }
                None => Err(RelayError::SourceConnection("offline".into())),
            }
        }
    }

    fn rose(donor: &str) -> RelayResult<SourceEvent> {
        Ok(SourceEvent::Gift(
            RawGiftEvent::new(donor, donor, "", "rose", "", 1, 1, Utc::now()).unwrap(),
        ))
    }

    fn supervisor(
        source: Arc<ScriptedSource>,
        publisher: Option<Publisher>,
    ) -> (ListenerSupervisor, Arc<Aggregator>, Arc<FanoutHub>) {
        let aggregator = Arc::new(Aggregator::new(20));
        let hub = Arc::new(FanoutHub::new(aggregator.clone(), Duration::from_secs(1)));
        let supervisor = ListenerSupervisor::new(
            BroadcasterKey::parse("host").unwrap(),
            source,
            aggregator.clone(),
            hub.clone(),
            publisher,
            ConnectionHealthTracker::new(3),
            CancellationToken::new(),
        );
        (supervisor, aggregator, hub)
    }

    #[tokio::test]
    async fn test_session_applies_gifts_and_skips_malformed() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            rose("A"),
            Err(RelayError::MalformedEvent("missing repeatCount".into())),
            rose("A"),
        ]]));
        let (mut supervisor, aggregator, hub) = supervisor(source, None);
        let mut push = hub.subscribe_push();

        let outcome = supervisor.run().await.unwrap();

        assert_eq!(outcome, RunOutcome::Established);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.recent.len(), 1);
        assert_eq!(snapshot.recent[0].total_gift_count, 2);
        assert!(matches!(
            push.next_frame().await,
            Some(crate::core::services::fanout_hub::PushFrame::Update(_))
        ));
        assert_eq!(
            *supervisor.state().borrow(),
            ListenerState::Disconnected {
                consecutive_failures: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_reported_and_counted() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let (mut supervisor, aggregator, _hub) = supervisor(source, None);

        assert!(matches!(
            supervisor.run().await,
            Err(RelayError::SourceConnection(_))
        ));
        assert!(supervisor.run().await.is_err());
        assert_eq!(
            *supervisor.state().borrow(),
            ListenerState::Disconnected {
                consecutive_failures: 2
            }
        );
        assert_eq!(aggregator.snapshot().last_sequence, 0);
    }

    #[tokio::test]
    async fn test_connection_error_ends_session() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            rose("A"),
            Err(RelayError::SourceConnection("reset by peer".into())),
            rose("B"),
        ]]));
        let (mut supervisor, aggregator, _hub) = supervisor(source, None);

        assert_eq!(supervisor.run().await.unwrap(), RunOutcome::Established);
        assert_eq!(aggregator.snapshot().recent.len(), 1);
    }

    #[tokio::test]
    async fn test_resubscribes_within_one_backoff_interval() {
        let source = Arc::new(ScriptedSource::new(vec![vec![rose("A")], vec![rose("B")]]));
        let (supervisor, aggregator, _hub) = supervisor(source.clone(), None);
        let cancel = supervisor.cancel_token.clone();

        let handle = supervisor.spawn(
            Backoff::fixed(Duration::from_millis(20)),
            &Handle::current(),
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while source.attempts.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("supervisor did not resubscribe");

        let donors: Vec<_> = aggregator
            .snapshot()
            .recent
            .into_iter()
            .map(|e| e.donor_id)
            .collect();
        assert_eq!(donors, vec!["B", "A"]);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_applied_gifts_are_sent_for_persistence() {
        let publisher = Publisher::new(16);
        let mut receiver = publisher.subscribe();
        let source = Arc::new(ScriptedSource::new(vec![vec![rose("A"), rose("A")]]));
        let (mut supervisor, _aggregator, _hub) = supervisor(source, Some(publisher));

        supervisor.run().await.unwrap();

        let mut coalesced_flags = Vec::new();
        let mut credited = 0;
        while let Ok(event) = receiver.try_recv() {
            match event {
                PersistenceEvent::DonorCredited(credit) => credited += credit.diamonds_delta,
                PersistenceEvent::GiftRecorded(gift) => coalesced_flags.push(gift.coalesced),
            }
        }
        assert_eq!(credited, 2);
        assert_eq!(coalesced_flags, vec![false, true]);
    }
}
