use crate::core::domain::broadcaster::BroadcasterKey;
use crate::core::domain::donor::DonorTotals;
use crate::core::ports::event_source::EventSource;
use crate::core::services::aggregator::{Aggregator, DEFAULT_RECENT_CAPACITY};
use crate::core::services::fanout_hub::{
    FanoutHub, PollResponse, PushSubscription, DEFAULT_HEARTBEAT_INTERVAL,
};
use crate::core::services::listener_supervisor::{ListenerState, ListenerSupervisor};
use crate::messaging::Publisher;
use crate::metrics::connection_health_tracker::ConnectionHealthTracker;
use crate::metrics::{HealthCheck, HealthReport, HealthReporting};
use crate::utils::backoff::Backoff;
use crate::utils::error::{RelayError, RelayResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Settings applied to every listener the registry creates.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub recent_capacity: usize,
    pub heartbeat_interval: Duration,
    pub replay_on_connect: bool,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub unhealthy_after_failures: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            replay_on_connect: true,
            retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            unhealthy_after_failures: 3,
        }
    }
}

impl ListenerOptions {
    fn backoff(&self) -> Backoff {
        Backoff::new(
            self.retry_delay,
            self.max_retry_delay,
            self.backoff_multiplier,
            self.jitter,
        )
    }
}

/// Everything the registry keeps for one broadcaster.
pub struct ListenerHandle {
    broadcaster: BroadcasterKey,
    aggregator: Arc<Aggregator>,
    hub: Arc<FanoutHub>,
    state: watch::Receiver<ListenerState>,
    health: ConnectionHealthTracker,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change of this listener.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }
}

/// Process-wide map from broadcaster to its listener, aggregator and fanout hub.
///
/// Built once in bootstrap and shared by `Arc`. The first request for an unknown broadcaster
/// creates its entry and starts its supervisor; concurrent first requests still create exactly
/// one entry. Later lookups only take the shared read lock.
///
/// Listener tasks run on the runtime that constructed the registry, not on whichever request
/// worker happened to create the entry.
pub struct ListenerRegistry {
    source: Arc<dyn EventSource>,
    publisher: Option<Publisher>,
    options: ListenerOptions,
    entries: RwLock<HashMap<BroadcasterKey, Arc<ListenerHandle>>>,
    cancel_token: CancellationToken,
    runtime: Handle,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        source: Arc<dyn EventSource>,
        publisher: Option<Publisher>,
        options: ListenerOptions,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            source,
            publisher,
            options,
            entries: RwLock::new(HashMap::new()),
            cancel_token,
            runtime: Handle::current(),
        }
    }

    /// Returns the entry for `broadcaster` if it is already tracked.
    pub fn get(&self, broadcaster: &BroadcasterKey) -> Option<Arc<ListenerHandle>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(broadcaster)
            .cloned()
    }

    /// Returns the entry for `broadcaster`, creating it and starting its listener if needed.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Api` once the registry has been shut down.
    pub fn get_or_create(&self, broadcaster: &BroadcasterKey) -> RelayResult<Arc<ListenerHandle>> {
        if let Some(entry) = self.get(broadcaster) {
            return Ok(entry);
        }
        if self.cancel_token.is_cancelled() {
            return Err(RelayError::Api("listener registry is shut down".into()));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(broadcaster) {
            return Ok(entry.clone());
        }

        let entry = Arc::new(self.start_listener(broadcaster));
        entries.insert(broadcaster.clone(), entry.clone());
        info!(
            broadcaster = %broadcaster,
            tracked = entries.len(),
            "Tracking new broadcaster"
        );
        Ok(entry)
    }

    fn start_listener(&self, broadcaster: &BroadcasterKey) -> ListenerHandle {
        let aggregator = Arc::new(Aggregator::new(self.options.recent_capacity));
        let hub = Arc::new(FanoutHub::new(
            aggregator.clone(),
            self.options.heartbeat_interval,
        ));
        let health = ConnectionHealthTracker::new(self.options.unhealthy_after_failures);

        let supervisor = ListenerSupervisor::new(
            broadcaster.clone(),
            self.source.clone(),
            aggregator.clone(),
            hub.clone(),
            self.publisher.clone(),
            health.clone(),
            self.cancel_token.child_token(),
        );
        let state = supervisor.state();
        let task = supervisor.spawn(self.options.backoff(), &self.runtime);

        ListenerHandle {
            broadcaster: broadcaster.clone(),
            aggregator,
            hub,
            state,
            health,
            task: Mutex::new(Some(task)),
        }
    }

    /// Serves a poll for `broadcaster` with the caller's cursor.
    pub fn poll(
        &self,
        broadcaster: &BroadcasterKey,
        last_seen_sequence: Option<u64>,
    ) -> RelayResult<PollResponse> {
        Ok(self.get_or_create(broadcaster)?.hub.poll(last_seen_sequence))
    }

    /// Opens a push subscription for `broadcaster`, replaying recent events if configured.
    pub fn subscribe_push(&self, broadcaster: &BroadcasterKey) -> RelayResult<PushSubscription> {
        let entry = self.get_or_create(broadcaster)?;
        Ok(if self.options.replay_on_connect {
            entry.hub.subscribe_push_with_replay()
        } else {
            entry.hub.subscribe_push()
        })
    }

    pub fn top_donors(
        &self,
        broadcaster: &BroadcasterKey,
        limit: usize,
    ) -> RelayResult<Vec<DonorTotals>> {
        Ok(self.get_or_create(broadcaster)?.aggregator.top_donors(limit))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handles(&self) -> Vec<Arc<ListenerHandle>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Stops every listener and waits for their tasks to finish.
    ///
    /// Aggregated state stays readable; new broadcasters can no longer be tracked.
    pub async fn shutdown(&self) -> RelayResult<()> {
        self.cancel_token.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .handles()
            .iter()
            .filter_map(|handle| {
                handle
                    .task
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
            })
            .collect();

        for task in tasks {
            task.await?;
        }
        info!("Listener registry shut down");
        Ok(())
    }
}

impl HealthCheck for ListenerRegistry {
    fn healthy(&self) -> bool {
        self.handles().iter().all(|handle| handle.health.healthy())
    }
}

impl HealthReporting for ListenerRegistry {
    fn report(&self) -> HealthReport {
        let handles = self.handles();
        let connected_listeners = handles
            .iter()
            .filter(|handle| handle.state() == ListenerState::Connected)
            .count();
        let mut unhealthy_listeners: Vec<String> = handles
            .iter()
            .filter(|handle| !handle.health.healthy())
            .map(|handle| handle.broadcaster.to_string())
            .collect();
        unhealthy_listeners.sort();

        HealthReport {
            tracked_broadcasters: handles.len(),
            connected_listeners,
            unhealthy_listeners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::gift::RawGiftEvent;
    use crate::core::domain::source_event::SourceEvent;
    use crate::core::ports::event_source::SourceSubscription;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Keeps every connection open and lets the test push events into it.
    #[derive(Default)]
    struct ChannelSource {
        subscribes: AtomicUsize,
        senders: Mutex<Vec<mpsc::Sender<RelayResult<SourceEvent>>>>,
    }

    #[async_trait]
    impl EventSource for ChannelSource {
        async fn subscribe(
            &self,
            _broadcaster: &BroadcasterKey,
        ) -> RelayResult<SourceSubscription> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(SourceSubscription::new(rx, CancellationToken::new()))
        }
    }

    struct OfflineSource;

    #[async_trait]
    impl EventSource for OfflineSource {
        async fn subscribe(
            &self,
            _broadcaster: &BroadcasterKey,
        ) -> RelayResult<SourceSubscription> {
            Err(RelayError::SourceConnection("offline".into()))
        }
    }

    fn options() -> ListenerOptions {
        ListenerOptions {
            retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(20),
            jitter: false,
            unhealthy_after_failures: 2,
            ..ListenerOptions::default()
        }
    }

    fn key(raw: &str) -> BroadcasterKey {
        BroadcasterKey::parse(raw).unwrap()
    }

    async fn wait_for_state(handle: &ListenerHandle, wanted: impl FnMut(&ListenerState) -> bool) {
        let mut state = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(wanted))
            .await
            .expect("listener never reached the expected state")
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_first_access_creates_one_listener() {
        let source = Arc::new(ChannelSource::default());
        let registry = Arc::new(ListenerRegistry::new(
            source.clone(),
            None,
            options(),
            CancellationToken::new(),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        registry.poll(&key("host"), None).map(|_| ())
                    } else {
                        registry.subscribe_push(&key("host")).map(|_| ())
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.len(), 1);
        let first = registry.get(&key("host")).unwrap();
        let second = registry.get_or_create(&key("@host")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        wait_for_state(&first, |s| *s == ListenerState::Connected).await;
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 1);
        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_flow_from_source_to_poll_and_push() {
        let source = Arc::new(ChannelSource::default());
        let registry = ListenerRegistry::new(
            source.clone(),
            None,
            options(),
            CancellationToken::new(),
        );
        let mut push = registry.subscribe_push(&key("host")).unwrap();
        let handle = registry.get(&key("host")).unwrap();
        wait_for_state(&handle, |s| *s == ListenerState::Connected).await;

        let sender = source.senders.lock().unwrap()[0].clone();
        let gift = RawGiftEvent::new("A", "Alice", "", "rose", "", 1, 1, Utc::now()).unwrap();
        sender.send(Ok(SourceEvent::Gift(gift))).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match push.next_frame().await {
                    Some(crate::core::services::fanout_hub::PushFrame::Heartbeat) => continue,
                    other => return other,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            frame,
            Some(crate::core::services::fanout_hub::PushFrame::Update(ref e)) if e.donor_id == "A"
        ));

        let response = registry.poll(&key("host"), None).unwrap();
        assert_eq!(response.recent.len(), 1);
        assert_eq!(response.top_donor.unwrap().donor_id, "A");
        assert_eq!(registry.top_donors(&key("host"), 5).unwrap().len(), 1);

        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_listener_is_reported_unhealthy() {
        let registry = ListenerRegistry::new(
            Arc::new(OfflineSource),
            None,
            options(),
            CancellationToken::new(),
        );
        let handle = registry.get_or_create(&key("host")).unwrap();

        wait_for_state(&handle, |s| {
            matches!(
                s,
                ListenerState::Disconnected { consecutive_failures } if *consecutive_failures >= 2
            )
        })
        .await;

        let report = registry.report();
        assert_eq!(report.tracked_broadcasters, 1);
        assert_eq!(report.connected_listeners, 0);
        assert_eq!(report.unhealthy_listeners, vec!["host".to_string()]);
        assert!(!registry.healthy());

        let poll = registry.poll(&key("host"), None).unwrap();
        assert!(poll.recent.is_empty());
        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_broadcasters_but_keeps_state() {
        let registry = ListenerRegistry::new(
            Arc::new(ChannelSource::default()),
            None,
            options(),
            CancellationToken::new(),
        );
        registry.get_or_create(&key("known")).unwrap();
        registry.shutdown().await.unwrap();

        assert!(registry.get_or_create(&key("known")).is_ok());
        assert!(matches!(
            registry.get_or_create(&key("unknown")),
            Err(RelayError::Api(_))
        ));
    }
}
