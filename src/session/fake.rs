//! A recording fake for [Connect] and [ApplianceSession].
//!
//! [FakeConnector] hands out [FakeSession]s that share its state, so tests can configure
//! per-address behavior up front and inspect every call afterwards.

use super::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One recorded call against a fake appliance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Open { username: String },
    Execute { domain: String, command: String },
    ListFilestore { domain: String, location: String },
    GetFile { domain: String, path: String },
    PollStatus(JobHandle),
    FetchArtifact(JobHandle),
    CreateDirectory { domain: String, path: String },
    RemoveDirectory { domain: String, path: String },
    SetFile { domain: String, path: String, contents: Vec<u8> },
    RemoveFile { domain: String, path: String },
    SubmitJob(JobSpec),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        use Call::*;
        matches!(
            self,
            CreateDirectory { .. }
                | RemoveDirectory { .. }
                | SetFile { .. }
                | RemoveFile { .. }
                | SubmitJob(_)
        )
    }
}

/// How a fake job progresses.
#[derive(Clone, Copy, Debug, Default)]
pub enum JobBehaviour {
    /// Reports [JobStatus::InProgress] this many times, then [JobStatus::Succeeded].
    SucceedAfter(u32),

    /// Reports [JobStatus::InProgress] this many times, then [JobStatus::Failed].
    FailAfter(u32),

    /// Never leaves [JobStatus::InProgress].
    InProgressForever,

    #[default]
    SucceedImmediately,
}

/// Per-address configuration. Everything succeeds by default.
#[derive(Clone, Debug, Default)]
pub struct Behaviour {
    pub unreachable: bool,
    pub rejects_authentication: bool,
    pub commands_fail: bool,
    pub panics: bool,
    pub submission_fails: bool,
    pub fetch_fails: bool,
    pub job: JobBehaviour,

    /// How long every [ApplianceSession::execute] call takes.
    pub latency: Option<Duration>,

    /// Canned output for specific commands.
    pub responses: HashMap<String, String>,

    /// What [ApplianceSession::list_filestore] returns.
    pub listing: Vec<FileEntry>,
}

#[derive(Debug, Default)]
struct State {
    behaviours: HashMap<String, Behaviour>,
    calls: HashMap<String, Vec<(Instant, Call)>>,
    open: usize,
    max_open: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<State>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modifies the [Behaviour] of `address`.
    pub fn configure(&self, address: &str, configure: impl FnOnce(&mut Behaviour)) {
        let mut state = self.state.lock().unwrap();
        configure(state.behaviours.entry(address.to_owned()).or_default());
    }

    /// Returns every call made against `address`, in order.
    pub fn calls(&self, address: &str) -> Vec<Call> {
        self.timed_calls(address).into_iter().map(|(_, c)| c).collect()
    }

    /// Like [Self::calls], with the (possibly paused) Tokio time of each call.
    pub fn timed_calls(&self, address: &str) -> Vec<(Instant, Call)> {
        let state = self.state.lock().unwrap();
        state.calls.get(address).cloned().unwrap_or_default()
    }

    /// The highest number of sessions that were open at the same time.
    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    fn record(&self, address: &str, call: Call) -> Behaviour {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .entry(address.to_owned())
            .or_default()
            .push((Instant::now(), call));
        state.behaviours.get(address).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Connect for FakeConnector {
    type Session = FakeSession;

    async fn open(
        &self,
        address: &str,
        credential: &Credential,
    ) -> Result<FakeSession, SessionError> {
        let behaviour = self.record(
            address,
            Call::Open {
                username: credential.username().to_owned(),
            },
        );

        if behaviour.unreachable {
            return Err(SessionError::Connect {
                address: address.to_owned(),
                reason: "unreachable".to_owned(),
            });
        }
        if behaviour.rejects_authentication {
            return Err(SessionError::Authentication {
                username: credential.username().to_owned(),
                reason: "access denied".to_owned(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        drop(state);

        Ok(FakeSession {
            connector: self.clone(),
            address: address.to_owned(),
            polls: 0,
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    connector: FakeConnector,
    address: String,
    polls: u32,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.connector.state.lock() {
            state.open -= 1;
        }
    }
}

impl FakeSession {
    fn record(&self, call: Call) -> Result<Behaviour, SessionError> {
        let behaviour = self.connector.record(&self.address, call);
        if behaviour.panics {
            panic!("fake appliance {} panicked", self.address);
        }
        match behaviour.commands_fail {
            true => Err(SessionError::Command("command rejected".to_owned())),
            false => Ok(behaviour),
        }
    }
}

#[async_trait]
impl ApplianceSession for FakeSession {
    async fn execute(&mut self, domain: &str, command: &str) -> Result<String, SessionError> {
        let behaviour = self.record(Call::Execute {
            domain: domain.to_owned(),
            command: command.to_owned(),
        })?;
        if let Some(latency) = behaviour.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(behaviour
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("{}: {command}", self.address)))
    }

    async fn list_filestore(
        &mut self,
        domain: &str,
        location: &str,
    ) -> Result<Vec<FileEntry>, SessionError> {
        let behaviour = self.record(Call::ListFilestore {
            domain: domain.to_owned(),
            location: location.to_owned(),
        })?;
        Ok(behaviour.listing)
    }

    async fn get_file(&mut self, domain: &str, path: &str) -> Result<Vec<u8>, SessionError> {
        self.record(Call::GetFile {
            domain: domain.to_owned(),
            path: path.to_owned(),
        })?;
        Ok(format!("{}:{path}", self.address).into_bytes())
    }

    async fn poll_status(&mut self, job: &JobHandle) -> Result<JobStatus, SessionError> {
        let behaviour = self.record(Call::PollStatus(job.clone()))?;
        let polls = self.polls;
        self.polls += 1;
        Ok(match behaviour.job {
            JobBehaviour::SucceedImmediately => JobStatus::Succeeded,
            JobBehaviour::SucceedAfter(n) if polls >= n => JobStatus::Succeeded,
            JobBehaviour::FailAfter(n) if polls >= n => JobStatus::Failed("disk full".to_owned()),
            _ => JobStatus::InProgress,
        })
    }

    async fn fetch_artifact(&mut self, job: &JobHandle) -> Result<Vec<u8>, SessionError> {
        let behaviour = self.record(Call::FetchArtifact(job.clone()))?;
        match behaviour.fetch_fails {
            true => Err(SessionError::Command("artifact vanished".to_owned())),
            false => Ok(format!("archive from {}", self.address).into_bytes()),
        }
    }

    async fn create_directory(&mut self, domain: &str, path: &str) -> Result<(), SessionError> {
        self.record(Call::CreateDirectory {
            domain: domain.to_owned(),
            path: path.to_owned(),
        })
        .map(drop)
    }

    async fn remove_directory(&mut self, domain: &str, path: &str) -> Result<(), SessionError> {
        self.record(Call::RemoveDirectory {
            domain: domain.to_owned(),
            path: path.to_owned(),
        })
        .map(drop)
    }

    async fn set_file(
        &mut self,
        domain: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<(), SessionError> {
        self.record(Call::SetFile {
            domain: domain.to_owned(),
            path: path.to_owned(),
            contents: contents.to_vec(),
        })
        .map(drop)
    }

    async fn remove_file(&mut self, domain: &str, path: &str) -> Result<(), SessionError> {
        self.record(Call::RemoveFile {
            domain: domain.to_owned(),
            path: path.to_owned(),
        })
        .map(drop)
    }

    async fn submit_job(&mut self, spec: &JobSpec) -> Result<JobHandle, SessionError> {
        let behaviour = self.record(Call::SubmitJob(spec.clone()))?;
        match behaviour.submission_fails {
            true => Err(SessionError::Command("job queue full".to_owned())),
            false => Ok(JobHandle(format!("job-{}", self.address))),
        }
    }
}
