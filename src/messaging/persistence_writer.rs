use crate::core::ports::persistence::PersistencePort;
use crate::messaging::{PersistenceEvent, Publisher};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Identical persistence errors are logged at most once per this window.
const ERROR_LOG_WINDOW: Duration = Duration::from_secs(300);

#[derive(Default)]
struct WriterStats {
    writes_succeeded: AtomicUsize,
    writes_failed: AtomicUsize,
    events_dropped: AtomicUsize,
}

/// Drains persistence notifications into a [`PersistencePort`].
///
/// Keeps counters so that bootstrap can report how much was written on shutdown.
pub struct PersistenceWriter {
    store: Arc<dyn PersistencePort>,
    stats: Arc<WriterStats>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn PersistencePort>) -> Self {
        Self {
            store,
            stats: Arc::new(WriterStats::default()),
        }
    }

    /// Returns `(succeeded, failed, dropped)` counts.
    pub fn get_stats(&self) -> (usize, usize, usize) {
        (
            self.stats.writes_succeeded.load(Ordering::Relaxed),
            self.stats.writes_failed.load(Ordering::Relaxed),
            self.stats.events_dropped.load(Ordering::Relaxed),
        )
    }

    async fn write(&self, event: PersistenceEvent) -> crate::utils::error::RelayResult<()> {
        match event {
            PersistenceEvent::DonorCredited(credit) => self.store.record_donation(credit).await,
            PersistenceEvent::GiftRecorded(gift) => self.store.record_gift(gift).await,
        }
    }
}

/// Runs the persistence loop until cancelled or the publisher goes away.
///
/// Write failures are counted and logged with rate limiting; they are not retried. When the
/// receiver lags, the skipped notifications are counted as dropped and the loop continues.
pub async fn run_persistence_writer(
    mut receiver: tokio::sync::broadcast::Receiver<PersistenceEvent>,
    cancel_token: CancellationToken,
    writer: Arc<PersistenceWriter>,
) {
    let mut last_error_time: HashMap<String, Instant> = HashMap::new();

    info!("Persistence writer started");

    loop {
        select! {
            result = receiver.recv() => {
                match result {
                    Ok(event) => {
                        match writer.write(event).await {
                            Ok(()) => {
                                writer.stats.writes_succeeded.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                writer.stats.writes_failed.fetch_add(1, Ordering::Relaxed);

                                let message = e.to_string();
                                let now = Instant::now();
                                let should_log = last_error_time
                                    .get(&message)
                                    .map_or(true, |&last| now.duration_since(last) > ERROR_LOG_WINDOW);

                                if should_log {
                                    error!("Persistence write failed: {}", message);
                                    last_error_time.insert(message, now);
                                }
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        writer.stats.events_dropped.fetch_add(skipped as usize, Ordering::Relaxed);
                        warn!("Persistence writer lagged, dropped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Persistence channel closed");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Persistence writer cancelled gracefully");
                break;
            }
        }
    }

    let (ok, failed, dropped) = writer.get_stats();
    info!(
        "Persistence writer shutting down. {} writes succeeded, {} failed, {} dropped",
        ok, failed, dropped
    );
}

/// Subscribes to `publisher` and spawns [`run_persistence_writer`].
pub fn spawn_persistence_writer(
    publisher: &Publisher,
    cancel_token: CancellationToken,
    writer: Arc<PersistenceWriter>,
) -> tokio::task::JoinHandle<()> {
    let receiver = publisher.subscribe();
    tokio::spawn(run_persistence_writer(receiver, cancel_token, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::broadcaster::BroadcasterKey;
    use crate::core::ports::persistence::{DonorCredit, GiftRecord};
    use crate::utils::error::{RelayError, RelayResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        donations: Mutex<Vec<DonorCredit>>,
        fail_gifts: bool,
    }

    #[async_trait]
    impl PersistencePort for RecordingStore {
        async fn record_donation(&self, credit: DonorCredit) -> RelayResult<()> {
            self.donations.lock().unwrap().push(credit);
            Ok(())
        }

        async fn record_gift(&self, _gift: GiftRecord) -> RelayResult<()> {
            if self.fail_gifts {
                Err(RelayError::Persistence("gift table unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn credit() -> PersistenceEvent {
        PersistenceEvent::DonorCredited(DonorCredit {
            broadcaster: BroadcasterKey::parse("host").unwrap(),
            donor_id: "a".into(),
            display_name: "Alice".into(),
            avatar_url: String::new(),
            diamonds_delta: 5,
        })
    }

    fn gift() -> PersistenceEvent {
        PersistenceEvent::GiftRecorded(GiftRecord {
            broadcaster: BroadcasterKey::parse("host").unwrap(),
            donor_id: "a".into(),
            gift_name: "rose".into(),
            gift_image_url: String::new(),
            gift_count: 1,
            diamonds: 5,
            coalesced: false,
        })
    }

    #[tokio::test]
    async fn test_writer_records_and_counts_failures() {
        let store = Arc::new(RecordingStore {
            fail_gifts: true,
            ..Default::default()
        });
        let writer = Arc::new(PersistenceWriter::new(store.clone()));
        let publisher = Publisher::new(16);
        let cancel = CancellationToken::new();
        let handle = spawn_persistence_writer(&publisher, cancel.clone(), writer.clone());

        publisher.publish(credit()).unwrap();
        publisher.publish(gift()).unwrap();
        drop(publisher);

        handle.await.unwrap();

        assert_eq!(store.donations.lock().unwrap().len(), 1);
        assert_eq!(writer.get_stats(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_writer_stops_on_cancel() {
        let writer = Arc::new(PersistenceWriter::new(Arc::new(RecordingStore::default())));
        let publisher = Publisher::new(4);
        let cancel = CancellationToken::new();
        let handle = spawn_persistence_writer(&publisher, cancel.clone(), writer);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("writer did not stop")
            .unwrap();
    }
}
