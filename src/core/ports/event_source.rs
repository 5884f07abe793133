use crate::core::domain::broadcaster::BroadcasterKey;
use crate::core::domain::source_event::SourceEvent;
use crate::utils::error::RelayResult;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An open connection to the upstream source for one broadcaster.
///
/// Events arrive through `events`. An `Err(RelayError::MalformedEvent)` item describes a single
/// bad event and the connection stays usable. Any other error, or the channel closing, means the
/// connection is gone. Dropping the subscription cancels the connection.
pub struct SourceSubscription {
    events: mpsc::Receiver<RelayResult<SourceEvent>>,
    cancel: CancellationToken,
}

impl SourceSubscription {
    pub fn new(
        events: mpsc::Receiver<RelayResult<SourceEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { events, cancel }
    }

    /// Waits for the next event. `None` once the connection has terminated.
    pub async fn next(&mut self) -> Option<RelayResult<SourceEvent>> {
        self.events.recv().await
    }

    /// Asks the source to close the connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SourceSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The upstream live-event platform.
///
/// Implementations own their transport and protocol details. They are responsible for turning
/// wire payloads into validated [`SourceEvent`]s so that nothing downstream has to probe for
/// alternate field names.
#[async_trait]
#[cfg_attr(feature = "test-helpers", mockall::automock)]
pub trait EventSource: Send + Sync {
    /// Opens a connection for `broadcaster`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::SourceConnection` when the connection cannot be established.
    async fn subscribe(&self, broadcaster: &BroadcasterKey) -> RelayResult<SourceSubscription>;
}
