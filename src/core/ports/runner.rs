use crate::utils::error::RelayResult;
use async_trait::async_trait;

/// How a single run of a [`Runner`] ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The runner got going and later stopped on its own (for example the upstream closed).
    Established,
    /// The runner observed cancellation and should not be restarted.
    Cancelled,
}

/// A long-running unit of work that a scheduler restarts until shutdown.
///
/// `run` performs one session. Returning `Err` means the session could not be established;
/// the scheduler keeps backing off. Returning `Ok(RunOutcome::Established)` means the session
/// was live before ending, so the scheduler starts over from the initial delay.
#[async_trait]
#[cfg_attr(feature = "test-helpers", mockall::automock)]
pub trait Runner: Send + Sync {
    async fn run(&mut self) -> RelayResult<RunOutcome>;
}
