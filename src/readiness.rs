//! Readiness polling.
//!
//! Cloud operations such as launching or terminating an instance return before the resource
//! reaches its target state. A [`ReadinessPoller`] evaluates a [`ReadinessCheck`] repeatedly
//! under a [`ReadinessPolicy`] until the check holds or the attempts run out.
//!
//! Semantics:
//! - The first evaluation happens immediately; the policy interval is slept between attempts,
//!   never before the first or after the last.
//! - `Ok(true)` as soon as the check holds, `Ok(false)` once `max_attempts` evaluations have all
//!   returned false. Running out of attempts is an outcome, not an error.
//! - An `Err` from the check aborts the poll at once and is returned unchanged; a failed status
//!   query is never retried here.
//!
//! ```rust
//! use std::time::Duration;
//! use cloudbind::readiness::{ReadinessPolicy, ReadinessPoller, ReadinessCheck};
//! use cloudbind::InstantSleeper;
//!
//! struct AlwaysReady;
//!
//! #[async_trait::async_trait]
//! impl ReadinessCheck<u32> for AlwaysReady {
//!     type Error = std::convert::Infallible;
//!     async fn check(&self, _input: &u32) -> Result<bool, Self::Error> {
//!         Ok(true)
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let poller = ReadinessPoller::new(ReadinessPolicy::socket_open()).with_sleeper(InstantSleeper);
//! assert!(poller.await_ready(&AlwaysReady, &7).await.unwrap());
//! # });
//! ```

use crate::error::PolicyBuildError;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{BootstrapEvent, PollEvent, SharedSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a resource has reached its target state.
///
/// Implementations usually perform a status lookup, which may fail; that failure is the
/// `Error` type and aborts the poll.
#[async_trait]
pub trait ReadinessCheck<T: ?Sized + Sync>: Send + Sync {
    type Error: Send;

    async fn check(&self, input: &T) -> Result<bool, Self::Error>;
}

#[async_trait]
impl<T, C> ReadinessCheck<T> for Arc<C>
where
    T: ?Sized + Sync,
    C: ReadinessCheck<T> + ?Sized,
{
    type Error = C::Error;

    async fn check(&self, input: &T) -> Result<bool, Self::Error> {
        (**self).check(input).await
    }
}

/// Attempt count and spacing for one target state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    name: String,
    max_attempts: usize,
    interval: Duration,
}

impl ReadinessPolicy {
    pub const RUNNING: &'static str = "running";
    pub const TERMINATED: &'static str = "terminated";
    pub const SOCKET_OPEN: &'static str = "socket_open";

    pub fn builder(name: impl Into<String>) -> ReadinessPolicyBuilder {
        ReadinessPolicyBuilder::new(name)
    }

    /// Derive the attempt count from an overall budget: `ceil(budget / interval)`.
    pub fn from_budget(
        name: impl Into<String>,
        budget: Duration,
        interval: Duration,
    ) -> Result<Self, PolicyBuildError> {
        if interval.is_zero() {
            return Err(PolicyBuildError::ZeroInterval);
        }
        if budget < interval {
            return Err(PolicyBuildError::BudgetShorterThanInterval { budget, interval });
        }
        let attempts = budget.as_nanos().div_ceil(interval.as_nanos());
        let attempts = usize::try_from(attempts).unwrap_or(usize::MAX);
        Self::builder(name).max_attempts(attempts).interval(interval).build()
    }

    /// Instance reaching `running`: slow transition, three checks ten minutes apart.
    pub fn running() -> Self {
        Self { name: Self::RUNNING.to_string(), max_attempts: 3, interval: Duration::from_secs(600) }
    }

    /// Instance reaching `terminated`: a 20 s budget checked every 500 ms.
    pub fn terminated() -> Self {
        Self {
            name: Self::TERMINATED.to_string(),
            max_attempts: 40,
            interval: Duration::from_millis(500),
        }
    }

    /// A TCP socket accepting connections: 130 checks one second apart.
    pub fn socket_open() -> Self {
        Self {
            name: Self::SOCKET_OPEN.to_string(),
            max_attempts: 130,
            interval: Duration::from_secs(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Longest a poll can wait: `(max_attempts - 1) * interval`, saturating.
    pub fn budget(&self) -> Duration {
        let gaps = u32::try_from(self.max_attempts.saturating_sub(1)).unwrap_or(u32::MAX);
        self.interval.checked_mul(gaps).unwrap_or(Duration::MAX)
    }
}

/// Builder for [`ReadinessPolicy`].
#[derive(Debug, Clone)]
pub struct ReadinessPolicyBuilder {
    name: String,
    max_attempts: usize,
    interval: Duration,
}

impl ReadinessPolicyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), max_attempts: 3, interval: Duration::from_secs(1) }
    }

    /// Total evaluations, including the first. Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Wait between evaluations.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Result<ReadinessPolicy, PolicyBuildError> {
        if self.max_attempts == 0 {
            return Err(PolicyBuildError::InvalidMaxAttempts(0));
        }
        Ok(ReadinessPolicy {
            name: self.name,
            max_attempts: self.max_attempts,
            interval: self.interval,
        })
    }
}

/// Serializable override for one policy, as read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub max_attempts: usize,
    pub interval_ms: u64,
}

impl PolicySettings {
    pub fn to_policy(self, name: &str) -> Result<ReadinessPolicy, PolicyBuildError> {
        ReadinessPolicy::builder(name)
            .max_attempts(self.max_attempts)
            .interval(Duration::from_millis(self.interval_ms))
            .build()
    }
}

impl From<&ReadinessPolicy> for PolicySettings {
    fn from(policy: &ReadinessPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            interval_ms: u64::try_from(policy.interval.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Runs a check under a policy.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    policy: ReadinessPolicy,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl ReadinessPoller {
    pub fn new(policy: ReadinessPolicy) -> Self {
        Self { policy, sleeper: Arc::new(TokioSleeper), sink: SharedSink::default() }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Evaluate `check` against `input` until it holds or the attempts run out.
    pub async fn await_ready<T, C>(&self, check: &C, input: &T) -> Result<bool, C::Error>
    where
        T: ?Sized + Sync,
        C: ReadinessCheck<T> + ?Sized,
    {
        let policy = &self.policy;
        let start = tokio::time::Instant::now();

        for attempt in 1..=policy.max_attempts {
            self.emit(PollEvent::Attempt { policy: policy.name.clone(), attempt }).await;

            match check.check(input).await {
                Ok(true) => {
                    let elapsed = start.elapsed();
                    debug!(
                        target: "cloudbind::readiness",
                        policy = %policy.name, attempt, ?elapsed,
                        "target state reached"
                    );
                    self.emit(PollEvent::Ready {
                        policy: policy.name.clone(),
                        attempts: attempt,
                        elapsed,
                    })
                    .await;
                    return Ok(true);
                }
                Ok(false) => {
                    if attempt < policy.max_attempts {
                        self.sleeper.sleep(policy.interval).await;
                    }
                }
                Err(e) => {
                    warn!(
                        target: "cloudbind::readiness",
                        policy = %policy.name, attempt,
                        "status check failed; aborting poll"
                    );
                    self.emit(PollEvent::CheckFailed { policy: policy.name.clone(), attempt }).await;
                    return Err(e);
                }
            }
        }

        let elapsed = start.elapsed();
        debug!(
            target: "cloudbind::readiness",
            policy = %policy.name, attempts = policy.max_attempts, ?elapsed,
            "attempts exhausted"
        );
        self.emit(PollEvent::Exhausted {
            policy: policy.name.clone(),
            attempts: policy.max_attempts,
            elapsed,
        })
        .await;
        Ok(false)
    }

    async fn emit(&self, event: PollEvent) {
        self.sink.emit(BootstrapEvent::Poll(event)).await;
    }
}

/// A check bound to the poller that governs it.
#[derive(Debug, Clone)]
pub struct Retryable<C> {
    check: C,
    poller: ReadinessPoller,
}

impl<C> Retryable<C> {
    pub fn new(check: C, poller: ReadinessPoller) -> Self {
        Self { check, poller }
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        self.poller.policy()
    }

    pub fn check(&self) -> &C {
        &self.check
    }

    pub async fn apply<T>(&self, input: &T) -> Result<bool, C::Error>
    where
        T: ?Sized + Sync,
        C: ReadinessCheck<T>,
    {
        self.poller.await_ready(&self.check, input).await
    }
}

/// The three named policies the client uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicies {
    pub running: ReadinessPolicy,
    pub terminated: ReadinessPolicy,
    pub socket_open: ReadinessPolicy,
}

impl Default for ReadinessPolicies {
    fn default() -> Self {
        Self {
            running: ReadinessPolicy::running(),
            terminated: ReadinessPolicy::terminated(),
            socket_open: ReadinessPolicy::socket_open(),
        }
    }
}
