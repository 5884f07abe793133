use crate::core::domain::donor::DonorTotals;
use crate::core::domain::gift::AggregatedEvent;
use crate::core::domain::source_event::CommentEvent;
use crate::core::services::aggregator::Aggregator;
use itertools::Itertools;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// One frame delivered to a push subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    Update(AggregatedEvent),
    Comment(CommentEvent),
    /// Keep-alive emitted when the queue has been idle for a heartbeat interval.
    Heartbeat,
}

impl PushFrame {
    /// Encodes the frame as a Server-Sent Events message.
    pub fn to_sse(&self) -> String {
        match self {
            PushFrame::Update(event) => {
                let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
                format!("data: {json}\n\n")
            }
            PushFrame::Comment(comment) => {
                let json = serde_json::to_string(comment).unwrap_or_else(|_| "{}".into());
                format!("event: comment\ndata: {json}\n\n")
            }
            PushFrame::Heartbeat => ": heartbeat\n\n".to_string(),
        }
    }
}

/// Poll result for one consumer.
///
/// `last_seen_sequence` is the cursor the consumer should send on its next poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub recent: Vec<AggregatedEvent>,
    #[serde(serialize_with = "serialize_top_donor")]
    pub top_donor: Option<DonorTotals>,
    pub last_seen_sequence: u64,
}

fn serialize_top_donor<S>(donor: &Option<DonorTotals>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match donor {
        Some(donor) => donor.serialize(serializer),
        None => serializer.serialize_map(Some(0))?.end(),
    }
}

pub type SubscriberId = u64;

#[derive(Default)]
struct Subscribers {
    queues: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<PushFrame>>>,
    next_id: AtomicU64,
}

impl Subscribers {
    fn remove(&self, id: SubscriberId) -> bool {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// Distributes one broadcaster's updates to its consumers.
///
/// Push subscribers each own an unbounded FIFO queue filled by [`FanoutHub::publish`]. Poll
/// consumers carry their own cursor and read a snapshot of the aggregator, so no per-poller
/// state lives here.
pub struct FanoutHub {
    aggregator: Arc<Aggregator>,
    subscribers: Arc<Subscribers>,
    heartbeat_interval: Duration,
}

impl FanoutHub {
    pub fn new(aggregator: Arc<Aggregator>, heartbeat_interval: Duration) -> Self {
        Self {
            aggregator,
            subscribers: Arc::new(Subscribers::default()),
            heartbeat_interval,
        }
    }

    /// Appends `update` to every push queue. Returns how many subscribers received it.
    ///
    /// Never blocks. Queues whose reader has gone away are pruned on the way.
    pub fn publish(&self, update: &AggregatedEvent) -> usize {
        self.broadcast(PushFrame::Update(update.clone()))
    }

    /// Relays a chat comment to push subscribers. Comments are not sequenced or pollable.
    pub fn publish_comment(&self, comment: &CommentEvent) -> usize {
        self.broadcast(PushFrame::Comment(comment.clone()))
    }

    fn broadcast(&self, frame: PushFrame) -> usize {
        let mut queues = self
            .subscribers
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queues.retain(|id, queue| {
            let delivered = queue.send(frame.clone()).is_ok();
            if !delivered {
                debug!("Pruning closed push queue {}", id);
            }
            delivered
        });
        queues.len()
    }

    /// Registers a new push subscriber.
    pub fn subscribe_push(&self) -> PushSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sender);

        PushSubscription {
            id,
            receiver,
            backlog: VecDeque::new(),
            subscribers: Arc::downgrade(&self.subscribers),
            heartbeat_interval: self.heartbeat_interval,
            heartbeat: None,
        }
    }

    /// Registers a push subscriber that first receives the current recent events, oldest first.
    ///
    /// The queue is registered before the snapshot is taken, so an update racing with the
    /// subscription may be delivered twice but never lost. Consumers dedupe on
    /// `sequenceNumber`.
    pub fn subscribe_push_with_replay(&self) -> PushSubscription {
        let mut subscription = self.subscribe_push();
        let snapshot = self.aggregator.snapshot();
        subscription.backlog = snapshot
            .recent
            .into_iter()
            .rev()
            .map(PushFrame::Update)
            .collect();
        subscription
    }

    /// Drops a push subscriber's queue. Returns false if it was already gone.
    pub fn unsubscribe_push(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Serves one poll request.
    ///
    /// Without a cursor every recent event is returned, most recent first, and the cursor
    /// becomes the newest sequence number. With a cursor only entries with a greater sequence
    /// number are returned, oldest first, and the cursor advances to the last one. A cursor
    /// ahead of anything this aggregator has issued (for example from before a restart) is
    /// treated like no cursor.
    pub fn poll(&self, last_seen_sequence: Option<u64>) -> PollResponse {
        let snapshot = self.aggregator.snapshot();
        let top_donor = snapshot.top_donor().cloned();
        let cursor = last_seen_sequence.filter(|&seen| seen <= snapshot.last_sequence);

        let (recent, last_seen_sequence) = match cursor {
            None => {
                let newest = snapshot
                    .recent
                    .iter()
                    .map(|e| e.sequence_number)
                    .max()
                    .unwrap_or(0);
                (snapshot.recent, newest)
            }
            Some(seen) => {
                let fresh: Vec<AggregatedEvent> = snapshot
                    .recent
                    .into_iter()
                    .filter(|e| e.sequence_number > seen)
                    .sorted_by_key(|e| e.sequence_number)
                    .collect();
                let newest = fresh.last().map_or(seen, |e| e.sequence_number);
                (fresh, newest)
            }
        };

        PollResponse {
            recent,
            top_donor,
            last_seen_sequence,
        }
    }
}

/// A push subscriber's end of its delivery queue.
///
/// Dropping the subscription unregisters the queue from the hub, so an abandoned stream never
/// keeps accumulating frames.
pub struct PushSubscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<PushFrame>,
    backlog: VecDeque<PushFrame>,
    subscribers: Weak<Subscribers>,
    heartbeat_interval: Duration,
    heartbeat: Option<Interval>,
}

impl PushSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next frame.
    ///
    /// Replayed frames come first, then live updates. If nothing arrives within the heartbeat
    /// interval a [`PushFrame::Heartbeat`] is returned instead. `None` means the hub dropped the
    /// queue.
    ///
    /// The heartbeat timer starts on the first call and restarts whenever a live frame is
    /// delivered.
    pub async fn next_frame(&mut self) -> Option<PushFrame> {
        if let Some(frame) = self.backlog.pop_front() {
            return Some(frame);
        }

        let period = self.heartbeat_interval;
        let heartbeat = self.heartbeat.get_or_insert_with(|| {
            let mut heartbeat = time::interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat
        });

        tokio::select! {
            frame = self.receiver.recv() => {
                heartbeat.reset();
                frame
            }
            _ = heartbeat.tick() => Some(PushFrame::Heartbeat),
        }
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if subscribers.remove(self.id) {
                debug!("Push subscriber {} unsubscribed", self.id);
            }
        }
    }
}
