//! The interface the fleet engine uses to talk to a single appliance.
//!
//! The engine does not speak any appliance protocol itself. It consumes two traits: [Connect],
//! which opens authenticated sessions, and [ApplianceSession], which performs one command or file
//! operation at a time on the appliance it is connected to. The optional `openssh` feature provides
//! a production implementation in [mod@openssh]; tests use a recording fake.
//!
//! Every method is a suspension point, and each [ApplianceSession] is owned by exactly one task,
//! so implementations need no internal locking.

use crate::credential::Credential;
use crate::error::SessionError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub mod cli;

#[cfg(feature = "openssh")]
pub mod openssh;

#[cfg(test)]
pub mod fake;

/// Opens sessions to appliances.
#[async_trait]
pub trait Connect: Send + Sync {
    type Session: ApplianceSession + 'static;

    /// Connects and authenticates to the appliance at `address`.
    ///
    /// Implementations must not include [Credential::secret] in any error they return.
    async fn open(
        &self,
        address: &str,
        credential: &Credential,
    ) -> Result<Self::Session, SessionError>;
}

/// An authenticated connection to one appliance.
///
/// Methods are grouped by whether they change appliance state. Dry-run operations only ever call
/// the non-mutating ones.
#[async_trait]
pub trait ApplianceSession: Send {
    /// Runs one CLI command in `domain` and returns its output.
    async fn execute(&mut self, domain: &str, command: &str) -> Result<String, SessionError>;

    /// Lists the contents of a filestore location, e.g. `local:` or `local:///subdir`.
    async fn list_filestore(
        &mut self,
        domain: &str,
        location: &str,
    ) -> Result<Vec<FileEntry>, SessionError>;

    /// Returns the contents of a file.
    async fn get_file(&mut self, domain: &str, path: &str) -> Result<Vec<u8>, SessionError>;

    /// Polls a job previously returned by [Self::submit_job].
    async fn poll_status(&mut self, job: &JobHandle) -> Result<JobStatus, SessionError>;

    /// Retrieves the artifact produced by a job that reported [JobStatus::Succeeded].
    async fn fetch_artifact(&mut self, job: &JobHandle) -> Result<Vec<u8>, SessionError>;

    // Mutating methods.

    async fn create_directory(&mut self, domain: &str, path: &str) -> Result<(), SessionError>;

    async fn remove_directory(&mut self, domain: &str, path: &str) -> Result<(), SessionError>;

    /// Writes `contents` to `path`, replacing any existing file.
    async fn set_file(
        &mut self,
        domain: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<(), SessionError>;

    async fn remove_file(&mut self, domain: &str, path: &str) -> Result<(), SessionError>;

    /// Starts a long-running job on the appliance and returns its handle once acknowledged.
    async fn submit_job(&mut self, spec: &JobSpec) -> Result<JobHandle, SessionError>;
}

/// One entry in a filestore listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub kind: FileKind,

    /// Size in bytes. Appliances do not report sizes for directories.
    pub size: Option<u64>,

    /// The modification time as the appliance printed it.
    pub modified: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.size.map(|s| s.to_string()).unwrap_or_default();
        let modified = self.modified.as_deref().unwrap_or("");
        let name = match self.kind {
            FileKind::Directory => format!("{}/", self.name),
            FileKind::File => self.name.clone(),
        };
        write!(f, "{name:<40} {modified:<24} {size:>12}")
    }
}

/// Describes a long-running job to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobSpec {
    /// Creates a backup archive of the given application domains.
    Backup {
        domains: Vec<String>,
        comment: Option<String>,
    },

    /// Restores the given domains from a backup archive.
    Restore {
        domains: Vec<String>,
        archive: Arc<[u8]>,
    },
}

impl JobSpec {
    /// Returns whether a completed job leaves an artifact to retrieve.
    pub fn produces_artifact(&self) -> bool {
        matches!(self, JobSpec::Backup { .. })
    }
}

/// The appliance's opaque identifier for a submitted job.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job's status as the appliance reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Succeeded,

    /// The job ended in failure. Contains the appliance's explanation.
    Failed(String),
}
