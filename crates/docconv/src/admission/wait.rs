//! Bounded poll-and-wait for an external precondition

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of one probe of the precondition
#[derive(Debug, Clone)]
pub struct Probe<T> {
    pub ready: bool,
    pub observation: T,
}

impl<T> Probe<T> {
    pub fn new(ready: bool, observation: T) -> Self {
        Self { ready, observation }
    }
}

/// The precondition held
#[derive(Debug, Clone)]
pub struct Waited<T> {
    pub observation: T,
    /// Time spent waiting, zero if the first probe succeeded
    pub waited: Duration,
    /// Number of failed probes before success
    pub pending_polls: u32,
}

/// Why a wait ended without the precondition holding
#[derive(Debug, Clone)]
pub enum WaitError<T> {
    TimedOut { waited: Duration, last: T },
    Cancelled,
}

/// Sleep-and-recheck policy: poll every `poll_interval` until the probe
/// reports ready or `max_wait` has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            max_wait,
            poll_interval,
        }
    }

    /// Wait until `probe` reports ready.
    ///
    /// `on_pending` is called with the attempt number (0 for the first
    /// failure) and the observation after every failed probe. The timeout is
    /// checked after each probe, so a wait that never succeeds ends no later
    /// than `max_wait + poll_interval`.
    pub async fn wait_until<T, P, Fut, N>(
        &self,
        mut probe: P,
        mut on_pending: N,
        cancel: &CancellationToken,
    ) -> Result<Waited<T>, WaitError<T>>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
        N: FnMut(u32, &T),
    {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            let Probe { ready, observation } = probe().await;
            let waited = start.elapsed();
            if ready {
                return Ok(Waited {
                    observation,
                    waited,
                    pending_polls: attempt,
                });
            }

            on_pending(attempt, &observation);
            if waited >= self.max_wait {
                return Err(WaitError::TimedOut {
                    waited,
                    last: observation,
                });
            }
            attempt += 1;

            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
