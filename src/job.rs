//! Drives long-running appliance jobs (backup, restore) to a terminal state.
//!
//! A job goes through `Submitted → Polling → {Complete | TimedOut | Failed}`. [run_job] owns the
//! [LongRunningJob] for one target from submission until its outcome is known, so it is never
//! shared with another task.
//!
//! The deadline is an absolute [Instant] fixed when the appliance acknowledges the submission.
//! Polls are only issued before the deadline, and the sleep between polls never overshoots it, so a
//! job that stays in progress is reported as [ErrorKind::TimedOut] at the deadline and not before.
//! Timing out only stops local waiting; the job keeps running on the appliance.

use crate::dispatch::TargetContext;
use crate::environment::ResolvedTarget;
use crate::error::{ErrorKind, Failure};
use crate::session::{ApplianceSession, JobHandle, JobSpec, JobStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The shortest interval between polls, whatever the settings say.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stands in for a timeout too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How long to wait for a job, and how often to ask about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobSettings {
    /// Measured from the appliance's acknowledgement of the submission.
    pub timeout: Duration,

    /// The wait after the first in-progress poll. Each later wait doubles, up to
    /// [Self::max_poll_interval].
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            timeout: Duration::from_secs(1200),
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPhase {
    Submitted,
    Polling,
    Complete,
    TimedOut,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        use JobPhase::*;
        matches!(self, Complete | TimedOut | Failed)
    }
}

/// The orchestrator's record of one submitted job.
#[derive(Clone, Debug)]
pub struct LongRunningJob {
    pub target: ResolvedTarget,
    pub handle: JobHandle,
    pub phase: JobPhase,
    pub started_at: DateTime<Utc>,
    pub deadline: Instant,
    pub polls: u32,
    started: Instant,
}

impl LongRunningJob {
    fn submitted(target: ResolvedTarget, handle: JobHandle, timeout: Duration) -> Self {
        let started = Instant::now();
        LongRunningJob {
            target,
            handle,
            phase: JobPhase::Submitted,
            started_at: Utc::now(),
            deadline: started
                .checked_add(timeout)
                .unwrap_or(started + FAR_FUTURE),
            polls: 0,
            started,
        }
    }

    fn advance(&mut self, phase: JobPhase) {
        debug!(
            appliance = %self.target,
            job = %self.handle,
            from = ?self.phase,
            to = ?phase,
            "job phase changed",
        );
        self.phase = phase;
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What a completed job left behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub handle: JobHandle,
    pub started_at: DateTime<Utc>,

    /// The retrieved artifact, for jobs whose [JobSpec::produces_artifact] is true.
    pub artifact: Option<Vec<u8>>,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Submits `spec` over `session` and waits for it to finish.
///
/// Errors map onto the job's phase: a rejected submission is [ErrorKind::SubmissionFailed], a job
/// the appliance reports as failed is [ErrorKind::JobFailed], and a failed download after a
/// successful job is [ErrorKind::ArtifactRetrievalFailed]. Cancellation is passed through
/// unchanged from any phase.
pub async fn run_job<S>(
    session: &mut S,
    spec: &JobSpec,
    ctx: &TargetContext,
    settings: &JobSettings,
) -> Result<JobReport, Failure>
where
    S: ApplianceSession + ?Sized,
{
    let handle = ctx
        .guard(session.submit_job(spec))
        .await
        .map_err(|failure| reclassify(failure, ErrorKind::SubmissionFailed))?;

    let mut job = LongRunningJob::submitted(ctx.target.clone(), handle, settings.timeout);
    info!(appliance = %job.target, job = %job.handle, "job submitted");
    job.advance(JobPhase::Polling);

    let mut interval = settings.poll_interval.max(MIN_POLL_INTERVAL);
    loop {
        let now = Instant::now();
        if now >= job.deadline {
            job.advance(JobPhase::TimedOut);
            warn!(appliance = %job.target, job = %job.handle, polls = job.polls, "job timed out");
            return Err(Failure::new(
                ErrorKind::TimedOut,
                format!(
                    "job {} did not finish within {}s; it may still be running on the appliance",
                    job.handle,
                    settings.timeout.as_secs(),
                ),
            ));
        }

        let status = ctx.guard(session.poll_status(&job.handle)).await?;
        job.polls += 1;
        debug!(appliance = %job.target, job = %job.handle, ?status, polls = job.polls, "polled");

        match status {
            JobStatus::InProgress => {
                let remaining = job.deadline.saturating_duration_since(Instant::now());
                ctx.sleep(interval.min(remaining)).await?;
                interval = (interval * 2).min(settings.max_poll_interval.max(MIN_POLL_INTERVAL));
            }
            JobStatus::Succeeded => break,
            JobStatus::Failed(reason) => {
                job.advance(JobPhase::Failed);
                return Err(Failure::new(
                    ErrorKind::JobFailed,
                    format!("job {} failed: {reason}", job.handle),
                ));
            }
        }
    }

    let artifact = match spec.produces_artifact() {
        true => match ctx.guard(session.fetch_artifact(&job.handle)).await {
            Ok(bytes) => Some(bytes),
            Err(failure) => {
                job.advance(JobPhase::Failed);
                return Err(reclassify(failure, ErrorKind::ArtifactRetrievalFailed));
            }
        },
        false => None,
    };

    job.advance(JobPhase::Complete);
    info!(
        appliance = %job.target,
        job = %job.handle,
        polls = job.polls,
        elapsed = ?job.elapsed(),
        "job complete",
    );

    Ok(JobReport {
        elapsed: job.elapsed(),
        handle: job.handle,
        started_at: job.started_at,
        artifact,
        polls: job.polls,
    })
}

/// Gives a session failure the kind of the phase it happened in. Cancellation keeps its kind.
fn reclassify(failure: Failure, kind: ErrorKind) -> Failure {
    match failure.is_cancelled() {
        true => failure,
        false => Failure::new(kind, failure.message),
    }
}

#[cfg(test)]
mod test;
