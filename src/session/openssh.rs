//! The production [Connect] implementation, which drives the appliance CLI over SSH.
//!
//! Appliances authenticate CLI users inside the SSH channel: after the transport is up, the CLI
//! prompts for a user name and password. Every call therefore opens a channel on a multiplexed
//! [::openssh::Session], answers the login prompts, switches domain, runs its commands, and exits.
//! The secret is scrubbed from everything read back in case the appliance echoes it.
//!
//! File transfer and long-running jobs need the appliance's management interface, which this
//! connector does not speak. Those calls fail with [SessionError::Command].

use crate::credential::Credential;
use crate::error::SessionError;
use crate::session::{cli, ApplianceSession, Connect, FileEntry, JobHandle, JobSpec, JobStatus};
use async_trait::async_trait;
use ::openssh::{KnownHosts, Session, Stdio};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Text the CLI prints when it rejects a login.
const LOGIN_FAILURES: [&str; 3] = ["Login failed", "Access denied", "Authentication failure"];

/// Opens [SshSession]s, adding unknown host keys to `known_hosts`.
#[derive(Clone, Debug, Default)]
pub struct SshConnector;

#[async_trait]
impl Connect for SshConnector {
    type Session = SshSession;

    async fn open(&self, address: &str, credential: &Credential) -> Result<SshSession, SessionError> {
        let destination = format!("ssh://{}@{}", credential.username(), address);
        let session = Session::connect_mux(&destination, KnownHosts::Add)
            .await
            .map_err(|e| SessionError::Connect {
                address: address.to_owned(),
                reason: e.to_string(),
            })?;

        let mut session = SshSession {
            session,
            credential: credential.clone(),
        };

        // Log in once with no commands so that a bad password fails here rather than mid-operation.
        session.run_cli("default", &[]).await?;
        debug!(address, username = credential.username(), "logged in");
        Ok(session)
    }
}

/// An SSH connection to one appliance.
pub struct SshSession {
    session: Session,
    credential: Credential,
}

impl SshSession {
    /// Logs in, switches to `domain`, runs `commands`, and returns the scrubbed transcript.
    async fn run_cli(&mut self, domain: &str, commands: &[String]) -> Result<String, SessionError> {
        let mut child = self
            .session
            .raw_command("")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .await
            .map_err(|e| SessionError::Command(e.to_string()))?;

        let mut script = format!(
            "{}\n{}\n{}\n",
            self.credential.username(),
            self.credential.secret(),
            cli::switch_domain(domain),
        );
        for command in commands {
            script.push_str(command);
            script.push('\n');
        }
        script.push_str("exit\n");

        if let Some(mut stdin) = child.stdin().take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| SessionError::Command(format!("could not send commands: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SessionError::Command(e.to_string()))?;
        let transcript = self
            .credential
            .redact(&String::from_utf8_lossy(&output.stdout));

        if LOGIN_FAILURES.iter().any(|m| transcript.contains(m)) {
            return Err(SessionError::Authentication {
                username: self.credential.username().to_owned(),
                reason: "the appliance rejected the login".to_owned(),
            });
        }
        match cli::error_line(&transcript) {
            Some(error) => Err(SessionError::Command(error.to_owned())),
            None => Ok(transcript),
        }
    }

    async fn run_one(&mut self, domain: &str, command: String) -> Result<String, SessionError> {
        self.run_cli(domain, &[command]).await
    }
}

fn unsupported(what: &str) -> SessionError {
    SessionError::Command(format!("{what} is not available over the SSH CLI"))
}

#[async_trait]
impl ApplianceSession for SshSession {
    async fn execute(&mut self, domain: &str, command: &str) -> Result<String, SessionError> {
        self.run_one(domain, command.to_owned()).await
    }

    async fn list_filestore(
        &mut self,
        domain: &str,
        location: &str,
    ) -> Result<Vec<FileEntry>, SessionError> {
        let output = self.run_one(domain, cli::dir(location)).await?;
        Ok(cli::parse_listing(&output))
    }

    async fn get_file(&mut self, _domain: &str, _path: &str) -> Result<Vec<u8>, SessionError> {
        Err(unsupported("file download"))
    }

    async fn poll_status(&mut self, _job: &JobHandle) -> Result<JobStatus, SessionError> {
        Err(unsupported("job polling"))
    }

    async fn fetch_artifact(&mut self, _job: &JobHandle) -> Result<Vec<u8>, SessionError> {
        Err(unsupported("artifact retrieval"))
    }

    async fn create_directory(&mut self, domain: &str, path: &str) -> Result<(), SessionError> {
        self.run_one(domain, cli::mkdir(path)).await.map(drop)
    }

    async fn remove_directory(&mut self, domain: &str, path: &str) -> Result<(), SessionError> {
        self.run_one(domain, cli::rmdir(path)).await.map(drop)
    }

    async fn set_file(
        &mut self,
        _domain: &str,
        _path: &str,
        _contents: &[u8],
    ) -> Result<(), SessionError> {
        Err(unsupported("file upload"))
    }

    async fn remove_file(&mut self, domain: &str, path: &str) -> Result<(), SessionError> {
        self.run_one(domain, cli::delete(path)).await.map(drop)
    }

    async fn submit_job(&mut self, _spec: &JobSpec) -> Result<JobHandle, SessionError> {
        Err(unsupported("job submission"))
    }
}
