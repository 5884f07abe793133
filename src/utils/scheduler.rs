use crate::core::ports::runner::{RunOutcome, Runner};
use crate::utils::backoff::Backoff;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Schedules a runner that is restarted indefinitely until cancelled.
///
/// Each iteration calls `runner.run()`. A run that reports [`RunOutcome::Established`] resets
/// the backoff, since the connection was healthy for a while before it dropped. A run that
/// fails keeps growing the delay. Between iterations the task waits for the next backoff delay
/// or for the cancellation token, whichever comes first.
///
/// # Arguments
///
/// * `runner` - The runner to execute repeatedly.
/// * `backoff` - The delay policy applied between runs.
/// * `name` - Identifier used in log messages.
/// * `cancel_token` - Stops the loop once triggered.
/// * `runtime` - The runtime that hosts the loop.
pub fn schedule_with_backoff(
    mut runner: impl Runner + 'static,
    mut backoff: Backoff,
    name: String,
    cancel_token: CancellationToken,
    runtime: &Handle,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            match runner.run().await {
                Ok(RunOutcome::Established) => {
                    backoff.reset();
                    warn!("{name} session ended");
                }
                Ok(RunOutcome::Cancelled) => break,
                Err(e) => error!("{name} encountered an error: {e}"),
            }

            if cancel_token.is_cancelled() {
                break;
            }

            let delay = backoff.next_delay();
            info!("{name} restarting in {}", humantime::format_duration(delay));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("{name} stopped");
    })
}
