use crate::adapters::storage::memory_storage::MemoryStorageAdapter;
use crate::config::Config;
use crate::core::ports::event_source::EventSource;
use crate::core::services::listener_registry::ListenerRegistry;
use crate::messaging::persistence_writer::{spawn_persistence_writer, PersistenceWriter};
use crate::messaging::Publisher;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Starts the persistence writer when persistence is enabled.
///
/// Returns the publisher listeners should notify and the writer task.
pub fn setup_persistence(
    config: &Config,
    cancel_token: CancellationToken,
) -> Option<(Publisher, JoinHandle<()>)> {
    if !config.persistence.enabled {
        info!("Persistence disabled");
        return None;
    }

    let publisher = Publisher::new(config.persistence.channel_capacity);
    let storage = Arc::new(MemoryStorageAdapter::new());
    let writer = Arc::new(PersistenceWriter::new(storage));
    let handle = spawn_persistence_writer(&publisher, cancel_token, writer);
    info!("Persistence enabled (in-memory store)");

    Some((publisher, handle))
}

/// Builds the process-wide listener registry.
///
/// Listener tasks get child tokens of `cancel_token`, so cancelling it stops all of them.
pub fn setup_listener_registry(
    config: &Config,
    source: Arc<dyn EventSource>,
    publisher: Option<Publisher>,
    cancel_token: &CancellationToken,
) -> Arc<ListenerRegistry> {
    Arc::new(ListenerRegistry::new(
        source,
        publisher,
        config.listener_options(),
        cancel_token.child_token(),
    ))
}
