//! Waiter - Convergence poller for asynchronous remote operations
//!
//! Repeatedly reads a resource (or job) until its status enters a target
//! set, enters a failure set, disappears, or the time budget runs out.
//! Reads are strictly sequential and every sleep is clipped to the deadline,
//! so a wait blocks for at most `timeout` plus one read latency.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::{Instant, sleep_until};

use crate::cancel::Cancellation;
use crate::classify::{ErrorEnvelope, NotFoundRule, RemoteError, classify_any};
use crate::operation::OperationHandle;
use crate::status::{Observation, Phase, PollState, StateSets};

/// What a not-found read means for this wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// Absence is the goal (waiting for deletion)
    Succeed,
    /// Absence aborts the wait
    Fail,
    /// Up to `n` consecutive not-found reads count as pending, e.g. while a
    /// freshly created resource propagates to the read endpoint
    Tolerate(u32),
}

/// Parameters of one wait
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    pub states: StateSets,
    /// Total budget measured from the call, initial delay included
    pub timeout: Duration,
    /// Fixed sleep between reads; zero selects exponential backoff
    pub poll_interval: Duration,
    pub initial_delay: Duration,
    /// First backoff sleep when `poll_interval` is zero
    pub min_interval: Duration,
    /// Backoff ceiling when `poll_interval` is zero
    pub max_interval: Duration,
    /// Consecutive target reads required before succeeding
    pub continuous_target_occurrence: u32,
    pub not_found_rules: Vec<NotFoundRule>,
    pub not_found: NotFoundPolicy,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            states: StateSets::default(),
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            continuous_target_occurrence: 1,
            not_found_rules: vec![NotFoundRule::not_found()],
            not_found: NotFoundPolicy::Fail,
        }
    }
}

impl WaitConfig {
    pub fn new(states: StateSets) -> Self {
        Self {
            states,
            ..Self::default()
        }
    }

    /// Wait until the resource disappears. Any status in `pending` keeps the
    /// wait going; any other status is unexpected.
    pub fn for_deletion<I, S>(pending: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            states: StateSets::new(pending, Vec::<String>::new()),
            not_found: NotFoundPolicy::Succeed,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Poll with exponential backoff between `min` and `max`
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.poll_interval = Duration::ZERO;
        self.min_interval = min;
        self.max_interval = max.max(min);
        self
    }

    pub fn with_continuous_target_occurrence(mut self, count: u32) -> Self {
        self.continuous_target_occurrence = count.max(1);
        self
    }

    pub fn with_not_found_rules(mut self, rules: Vec<NotFoundRule>) -> Self {
        self.not_found_rules = rules;
        self
    }

    pub fn with_not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    fn next_interval(&self, backoff: &mut Duration) -> Duration {
        if !self.poll_interval.is_zero() {
            return self.poll_interval;
        }
        let current = *backoff;
        *backoff = current.saturating_mul(2).min(self.max_interval);
        current
    }
}

/// Outcome of a successful wait
#[derive(Debug, Clone, PartialEq)]
pub struct FinalState {
    /// Last read, `None` when the resource is gone
    pub observation: Option<Observation>,
    pub reads: u32,
    pub elapsed: Duration,
}

impl FinalState {
    pub fn is_gone(&self) -> bool {
        self.observation.is_none()
    }

    pub fn status(&self) -> Option<&str> {
        self.observation.as_ref().map(|o| o.status.as_str())
    }
}

/// Why a wait did not converge
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(
        "timed out after {}s waiting for {expected} (last status: {})",
        .timeout.as_secs(),
        .last_status.as_deref().unwrap_or("none")
    )]
    TimedOut {
        timeout: Duration,
        last_status: Option<String>,
        expected: String,
    },

    #[error("reached failure status {status}")]
    Failed { status: String },

    #[error("unexpected status {status}, expected one of {expected}")]
    UnexpectedState { status: String, expected: String },

    #[error("resource not found: {0}")]
    NotFound(ErrorEnvelope),

    #[error("read failed: {0}")]
    Remote(ErrorEnvelope),

    #[error("wait cancelled")]
    Cancelled,
}

impl WaitError {
    /// Timeouts are retryable by the caller
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled)
    }

    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            WaitError::NotFound(envelope) | WaitError::Remote(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// Stand-in for durations that overflow the clock (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + duration`, saturating at [`FAR_FUTURE`]
fn instant_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Sleep for `duration` (clipped to `deadline`) unless cancelled first
async fn pause(
    duration: Duration,
    deadline: Instant,
    cancel: &Cancellation,
) -> Result<(), WaitError> {
    let wake = instant_after(Instant::now(), duration).min(deadline);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = sleep_until(wake) => Ok(()),
    }
}

/// Poll `read` until the observed status converges.
///
/// Errors from `read` go through the classifier with
/// `config.not_found_rules`; only not-found is interpreted (per
/// `config.not_found`), everything else aborts with [`WaitError::Remote`].
pub async fn wait_for<F, Fut>(
    mut read: F,
    config: &WaitConfig,
    cancel: &Cancellation,
) -> Result<FinalState, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation, RemoteError>>,
{
    let started = Instant::now();
    let deadline = instant_after(started, config.timeout);
    let required = config.continuous_target_occurrence.max(1);

    let mut reads = 0u32;
    let mut last_status: Option<String> = None;
    let mut target_seen = 0u32;
    let mut not_found_seen = 0u32;
    let mut backoff = config.min_interval;

    if !config.initial_delay.is_zero() {
        debug!("Waiting {:?} before first read", config.initial_delay);
        pause(config.initial_delay, deadline, cancel).await?;
    }

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if Instant::now() >= deadline {
            warn!(
                "Timed out after {} reads waiting for {}",
                reads,
                config.states.describe_target()
            );
            return Err(WaitError::TimedOut {
                timeout: config.timeout,
                last_status,
                expected: config.states.describe_target(),
            });
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            result = read() => result,
        };
        reads += 1;

        match result {
            Ok(observation) => {
                not_found_seen = 0;
                let state = PollState::observe(&observation.status, &config.states);
                debug!("Read {}: status {:?} ({:?})", reads, state.status, state.phase);
                last_status = Some(state.status.clone());

                match state.phase {
                    Phase::TerminalSuccess => {
                        target_seen += 1;
                        if target_seen >= required {
                            info!("Reached {} after {} reads", state.status, reads);
                            return Ok(FinalState {
                                observation: Some(observation),
                                reads,
                                elapsed: started.elapsed(),
                            });
                        }
                    }
                    Phase::TerminalFailure => {
                        info!("Stopped at {} after {} reads", state.status, reads);
                        return Err(if config.states.is_failure(&state.status) {
                            WaitError::Failed {
                                status: state.status,
                            }
                        } else {
                            WaitError::UnexpectedState {
                                status: state.status,
                                expected: config.states.describe_expected(),
                            }
                        });
                    }
                    Phase::Pending => target_seen = 0,
                }
            }
            Err(err) => {
                let envelope = classify_any(&err, &config.not_found_rules);
                if !envelope.is_not_found() {
                    return Err(WaitError::Remote(envelope));
                }

                match config.not_found {
                    NotFoundPolicy::Succeed => {
                        target_seen += 1;
                        if target_seen >= required {
                            info!("Resource gone after {} reads", reads);
                            return Ok(FinalState {
                                observation: None,
                                reads,
                                elapsed: started.elapsed(),
                            });
                        }
                    }
                    NotFoundPolicy::Fail => return Err(WaitError::NotFound(envelope)),
                    NotFoundPolicy::Tolerate(limit) => {
                        target_seen = 0;
                        not_found_seen += 1;
                        if not_found_seen > limit {
                            return Err(WaitError::NotFound(envelope));
                        }
                        let state = PollState::absent(envelope);
                        warn!(
                            "Read {}: not found ({}/{} tolerated): {}",
                            reads,
                            not_found_seen,
                            limit,
                            state.last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                        );
                    }
                }
            }
        }

        pause(config.next_interval(&mut backoff), deadline, cancel).await?;
    }
}

/// Wait for an asynchronous operation to finish, consuming its handle
pub async fn wait_for_operation<F, Fut>(
    handle: OperationHandle,
    mut read: F,
    config: &WaitConfig,
    cancel: &Cancellation,
) -> Result<FinalState, WaitError>
where
    F: FnMut(&OperationHandle) -> Fut,
    Fut: Future<Output = Result<Observation, RemoteError>>,
{
    info!(
        "Waiting for operation {} on {} (issued {}s ago)",
        handle.id,
        handle.resource,
        handle.age().num_seconds()
    );
    wait_for(|| read(&handle), config, cancel).await
}
