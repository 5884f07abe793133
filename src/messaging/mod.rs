pub mod persistence_writer;

use crate::core::ports::persistence::{DonorCredit, GiftRecord};
use crate::utils::error::RelayResult;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Out-of-band notifications emitted by listeners after each applied gift.
///
/// These feed the optional persistence writer. They are never on the path that serves push or
/// poll consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistenceEvent {
    /// A donor's running total grew.
    DonorCredited(DonorCredit),
    /// A recent-events entry was created or coalesced.
    GiftRecorded(GiftRecord),
}

/// A simple event publisher based on Tokio's broadcast channel.
///
/// Slow receivers lag and lose the oldest notifications, which is acceptable for best-effort
/// persistence.
#[derive(Clone)]
pub struct Publisher {
    sender: broadcast::Sender<PersistenceEvent>,
}

impl Publisher {
    /// Creates a new `Publisher` whose channel holds at most `buffer` pending events.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody is subscribed.
    pub fn publish(&self, event: PersistenceEvent) -> RelayResult<usize> {
        self.sender.send(event).map_err(|e| e.into())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.sender.subscribe()
    }
}
