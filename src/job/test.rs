use super::*;
use crate::credential::Credential;
use crate::session::fake::{Behaviour, Call, FakeConnector, FakeSession, JobBehaviour};
use crate::session::Connect;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ADDRESS: &str = "192.168.0.10";

mod fixtures {
    use super::*;

    pub fn backup() -> JobSpec {
        JobSpec::Backup {
            domains: vec!["default".to_string()],
            comment: None,
        }
    }

    pub fn restore() -> JobSpec {
        JobSpec::Restore {
            domains: vec!["default".to_string()],
            archive: Arc::from(&b"archive"[..]),
        }
    }

    pub fn settings(timeout_secs: u64) -> JobSettings {
        JobSettings {
            timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(30),
        }
    }

    pub struct Fixture {
        pub connector: FakeConnector,
        pub ctx: TargetContext,
        pub cancel: CancellationToken,
    }

    impl Fixture {
        pub fn new(configure: impl FnOnce(&mut Behaviour)) -> Self {
            let connector = FakeConnector::new();
            connector.configure(ADDRESS, configure);
            let cancel = CancellationToken::new();
            let ctx = TargetContext::new(
                0,
                ResolvedTarget::new("dp1", ADDRESS),
                Arc::new(Credential::new("admin", "s3cret")),
                cancel.clone(),
            );
            Fixture {
                connector,
                ctx,
                cancel,
            }
        }

        pub async fn session(&self) -> FakeSession {
            self.connector
                .open(ADDRESS, &self.ctx.credential)
                .await
                .unwrap()
        }

        pub async fn run(&self, spec: &JobSpec, settings: &JobSettings) -> Result<JobReport, Failure> {
            let mut session = self.session().await;
            run_job(&mut session, spec, &self.ctx, settings).await
        }

        /// Times of every poll, relative to the submission.
        pub fn poll_offsets(&self) -> Vec<Duration> {
            let calls = self.connector.timed_calls(ADDRESS);
            let submitted = calls
                .iter()
                .find(|(_, c)| matches!(c, Call::SubmitJob(_)))
                .map(|(at, _)| *at)
                .unwrap();
            calls
                .iter()
                .filter(|(_, c)| matches!(c, Call::PollStatus(_)))
                .map(|(at, _)| at.duration_since(submitted))
                .collect()
        }
    }
}
use fixtures::*;

mod run_job {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn backup_completes_with_artifact() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::SucceedAfter(2));

        let report = fixture.run(&backup(), &settings(1200)).await.unwrap();

        assert_eq!(JobHandle(format!("job-{ADDRESS}")), report.handle);
        assert_eq!(3, report.polls);
        assert_eq!(
            Some(format!("archive from {ADDRESS}").into_bytes()),
            report.artifact
        );
        // Waits of 2s then 4s.
        assert_eq!(6, report.elapsed.as_secs());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_retrieves_nothing() {
        let fixture = Fixture::new(|_| {});

        let report = fixture.run(&restore(), &settings(1200)).await.unwrap();

        assert_eq!(None, report.artifact);
        assert!(!fixture
            .connector
            .calls(ADDRESS)
            .iter()
            .any(|c| matches!(c, Call::FetchArtifact(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_still_runs_the_job() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::SucceedAfter(1));

        let report = fixture.run(&restore(), &settings(u64::MAX)).await.unwrap();

        assert_eq!(2, report.polls);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_deadline_without_later_polls() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::InProgressForever);
        let start = Instant::now();

        let failure = fixture.run(&backup(), &settings(60)).await.unwrap_err();

        assert_eq!(ErrorKind::TimedOut, failure.kind);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(61), "{elapsed:?}");

        let polls = fixture.poll_offsets();
        assert_eq!(
            vec![0, 2, 6, 14, 30],
            polls.iter().map(Duration::as_secs).collect::<Vec<_>>()
        );
        assert!(polls.iter().all(|at| *at < Duration::from_secs(60)));
        assert!(!fixture
            .connector
            .calls(ADDRESS)
            .iter()
            .any(|c| matches!(c, Call::FetchArtifact(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_up_to_cap() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::InProgressForever);

        fixture.run(&backup(), &settings(100)).await.unwrap_err();

        let polls = fixture.poll_offsets();
        let gaps: Vec<u64> = polls
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect();
        assert_eq!(vec![2, 4, 8, 16, 30, 30], gaps);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_polls() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::InProgressForever);

        let failure = fixture.run(&backup(), &settings(0)).await.unwrap_err();

        assert_eq!(ErrorKind::TimedOut, failure.kind);
        assert!(fixture.poll_offsets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_is_submission_failed() {
        let fixture = Fixture::new(|b| b.submission_fails = true);

        let failure = fixture.run(&backup(), &settings(1200)).await.unwrap_err();

        assert_eq!(ErrorKind::SubmissionFailed, failure.kind);
        assert!(fixture.poll_offsets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn appliance_failure_is_job_failed() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::FailAfter(1));

        let failure = fixture.run(&backup(), &settings(1200)).await.unwrap_err();

        assert_eq!(ErrorKind::JobFailed, failure.kind);
        assert!(failure.message.contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_download_is_artifact_retrieval_failed() {
        let fixture = Fixture::new(|b| b.fetch_fails = true);

        let failure = fixture.run(&backup(), &settings(1200)).await.unwrap_err();

        assert_eq!(ErrorKind::ArtifactRetrievalFailed, failure.kind);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_poll_sleep() {
        let fixture = Fixture::new(|b| b.job = JobBehaviour::InProgressForever);
        let cancel = fixture.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        });
        let start = Instant::now();

        let failure = fixture.run(&backup(), &settings(1200)).await.unwrap_err();

        assert_eq!(ErrorKind::Cancelled, failure.kind);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}

#[test]
fn terminal_phases() {
    use JobPhase::*;
    assert!(!Submitted.is_terminal());
    assert!(!Polling.is_terminal());
    for phase in [Complete, TimedOut, Failed] {
        assert!(phase.is_terminal());
    }
}
