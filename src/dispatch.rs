//! Runs one operation against every appliance in a fleet.
//!
//! [Dispatcher::dispatch] spawns one task per target, bounded by an optional in-flight limit, and
//! returns only after every target has reached a terminal outcome. Each task returns its own
//! [Outcome]; nothing is shared between tasks except read-only credentials and the cancellation
//! token, so one target's failure, slowness, or panic never touches another's.
//!
//! [Dispatcher::run] layers session handling on top: it opens an [ApplianceSession] per target
//! through a [Connect] implementation and hands it to an [Operation].

use crate::credential::{Credential, Credentials};
use crate::environment::ResolvedTarget;
use crate::error::{ErrorKind, Failure};
use crate::session::{ApplianceSession, Connect};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The terminal outcome of one target.
pub type Outcome<T> = Result<T, Failure>;

/// The outcome of one dispatch for one target.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchResult<T> {
    pub target: ResolvedTarget,
    pub outcome: Outcome<T>,
}

/// One [DispatchResult] per target, in resolution order.
///
/// A report always has exactly as many entries as the dispatch had targets.
#[derive(Clone, Debug, PartialEq)]
pub struct FleetReport<T> {
    results: Vec<DispatchResult<T>>,
}

impl<T> FleetReport<T> {
    pub fn results(&self) -> &[DispatchResult<T>] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DispatchResult<T>> {
        self.results.iter()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchResult<T>> {
        self.results.iter().filter(|r| r.outcome.is_err())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Returns the process exit code for this report: 0 if every target succeeded, else 1.
    pub fn exit_code(&self) -> u8 {
        match self.all_succeeded() {
            true => 0,
            false => 1,
        }
    }
}

impl<T> FromIterator<DispatchResult<T>> for FleetReport<T> {
    fn from_iter<I: IntoIterator<Item = DispatchResult<T>>>(results: I) -> Self {
        FleetReport {
            results: results.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for FleetReport<T> {
    type Item = DispatchResult<T>;
    type IntoIter = std::vec::IntoIter<DispatchResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Everything one target's task knows about its own work.
///
/// Operations must await appliance calls and sleeps through [Self::guard] or [Self::sleep] so that
/// dispatch-wide cancellation is observed at every suspension point.
#[derive(Clone, Debug)]
pub struct TargetContext {
    /// The target's position in the resolution.
    pub index: usize,
    pub target: ResolvedTarget,
    pub credential: Arc<Credential>,
    cancel: CancellationToken,
}

impl TargetContext {
    pub fn new(
        index: usize,
        target: ResolvedTarget,
        credential: Arc<Credential>,
        cancel: CancellationToken,
    ) -> Self {
        TargetContext {
            index,
            target,
            credential,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Awaits `future` unless dispatch is cancelled first, in which case the future is dropped
    /// and a [ErrorKind::Cancelled] failure is returned.
    pub async fn guard<F, T, E>(&self, future: F) -> Result<T, Failure>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Failure::cancelled(format!(
                "dispatch cancelled while working on {}",
                self.target.alias,
            ))),
            result = future => result.map_err(Into::into),
        }
    }

    /// Sleeps for `duration`, waking early with a failure if dispatch is cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Failure> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok::<_, Failure>(())
        })
        .await
    }
}

/// Work to perform against one appliance over an open session.
#[async_trait]
pub trait Operation<S: ApplianceSession>: Send + Sync {
    type Output: Send + 'static;

    /// A one-line description for reports and logs, e.g. `show mem`.
    fn title(&self) -> String;

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Self::Output, Failure>;
}

/// Fans operations out across a fleet.
#[derive(Clone, Debug, Default)]
pub struct Dispatcher {
    max_in_flight: Option<NonZeroUsize>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Creates a [Dispatcher] with no concurrency limit and a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of targets processed at once. [None] means one task per target at once.
    pub fn with_max_in_flight(mut self, max_in_flight: Option<NonZeroUsize>) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Uses `cancel` as the dispatch-wide cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that cancels every dispatch made through this [Dispatcher].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `operation` once per target and collects a [FleetReport].
    ///
    /// When capped, targets start in resolution order as permits free up. Targets that have not
    /// started when dispatch is cancelled are reported as [ErrorKind::Cancelled] without running.
    /// A panic inside `operation` becomes an [ErrorKind::Faulted] failure for that target only, and a
    /// target left without a credential fails with [ErrorKind::CredentialCount].
    pub async fn dispatch<F, Fut, T>(
        &self,
        targets: &[ResolvedTarget],
        credentials: &Credentials,
        operation: F,
    ) -> FleetReport<T>
    where
        F: Fn(TargetContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
        T: Send + 'static,
    {
        let operation = Arc::new(operation);
        let limit = self
            .max_in_flight
            .map_or(targets.len(), NonZeroUsize::get)
            .max(1);
        let permits = Arc::new(Semaphore::new(limit));
        let mut outcomes: Vec<Option<Outcome<T>>> = targets.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, target) in targets.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcomes[index] = Some(Err(Failure::cancelled(
                    "dispatch cancelled before this appliance was started",
                )));
                continue;
            };

            let Some(credential) = credentials.for_index(index) else {
                outcomes[index] = Some(Err(Failure::new(
                    ErrorKind::CredentialCount,
                    format!("no credential for appliance {}", index + 1),
                )));
                continue;
            };
            let ctx = TargetContext::new(index, target.clone(), credential, self.cancel.clone());
            let operation = operation.clone();

            tasks.spawn(async move {
                let _permit = permit;
                debug!(
                    appliance = %ctx.target,
                    username = ctx.credential.username(),
                    "starting",
                );
                let outcome = AssertUnwindSafe(async move { (*operation)(ctx).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(Failure::new(ErrorKind::Faulted, panic_message(&*panic)))
                    });
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(error) => warn!(%error, "dispatch task did not complete"),
            }
        }

        let results = targets
            .iter()
            .cloned()
            .zip(outcomes)
            .map(|(target, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    Err(Failure::new(ErrorKind::Faulted, "task did not complete"))
                });
                match &outcome {
                    Ok(_) => info!(appliance = %target, "succeeded"),
                    Err(failure) => warn!(appliance = %target, %failure, "failed"),
                }
                DispatchResult { target, outcome }
            })
            .collect();

        FleetReport { results }
    }

    /// Opens a session to every target through `connector` and runs `operation` on it.
    ///
    /// Connection and authentication failures are reported per target like any other failure.
    pub async fn run<C, O>(
        &self,
        connector: Arc<C>,
        targets: &[ResolvedTarget],
        credentials: &Credentials,
        operation: Arc<O>,
    ) -> FleetReport<O::Output>
    where
        C: Connect + 'static,
        O: Operation<C::Session> + 'static,
    {
        info!(
            operation = %operation.title(),
            appliances = targets.len(),
            "dispatching",
        );

        self.dispatch(targets, credentials, move |ctx: TargetContext| {
            let connector = connector.clone();
            let operation = operation.clone();
            async move {
                let mut session = ctx
                    .guard(connector.open(&ctx.target.address, &ctx.credential))
                    .await?;
                operation.run(&mut session, &ctx).await
            }
        })
        .await
    }
}

/// Extracts a readable message from a caught panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "no message".to_owned());
    format!("operation panicked: {detail}")
}
