//! The operations an operator can run across a fleet.
//!
//! Each type here implements [Operation] for every [ApplianceSession], so one value can be handed
//! to [crate::dispatch::Dispatcher::run] with any connector. Operations that change appliance state
//! honor `dry_run`: they still connect, so reachability and credentials are checked, but they only
//! describe what they would have done.

use crate::dispatch::{Operation, TargetContext};
use crate::error::{ErrorKind, Failure};
use crate::job::{run_job, JobSettings};
use crate::session::{ApplianceSession, FileEntry, JobSpec};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// What one operation produced on one appliance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// CLI output, already scrubbed of the credential secret.
    Output(String),
    Listing(Vec<FileEntry>),

    /// A file written to the local file system.
    Saved(PathBuf),

    /// A change that was made on the appliance.
    Done(String),

    /// The steps a dry run skipped.
    DryRun(Vec<String>),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Payload::*;
        match self {
            Output(output) => f.write_str(output.trim_end()),
            Listing(entries) => {
                let lines: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
                f.write_str(&lines.join("\n"))
            }
            Saved(path) => write!(f, "saved {}", path.display()),
            Done(what) => f.write_str(what),
            DryRun(steps) => {
                let lines: Vec<String> = steps.iter().map(|s| format!("would {s}")).collect();
                f.write_str(&lines.join("\n"))
            }
        }
    }
}

/// Runs CLI commands in order, after switching to `domain`.
#[derive(Clone, Debug)]
pub struct IssueCommand {
    pub commands: Vec<String>,
    pub domain: String,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for IssueCommand {
    type Output = Payload;

    fn title(&self) -> String {
        self.commands.join("; ")
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        if self.dry_run {
            return Ok(Payload::DryRun(
                self.commands
                    .iter()
                    .map(|c| format!("run {c:?} in domain {}", self.domain))
                    .collect(),
            ));
        }

        let mut outputs = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            debug!(appliance = %ctx.target, %command, "executing");
            let output = ctx.guard(session.execute(&self.domain, command)).await?;
            outputs.push(ctx.credential.redact(output.trim_end()));
        }
        Ok(Payload::Output(outputs.join("\n")))
    }
}

/// Splits a command file into commands, one per non-blank line.
pub fn read_commands(script: &str) -> Vec<String> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Clone, Debug)]
pub struct ListFilestore {
    pub domain: String,
    pub location: String,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for ListFilestore {
    type Output = Payload;

    fn title(&self) -> String {
        format!("dir {}", self.location)
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        let entries = ctx
            .guard(session.list_filestore(&self.domain, &self.location))
            .await?;
        Ok(Payload::Listing(entries))
    }
}

/// Downloads one file from every appliance into `out_dir/<alias>/`.
#[derive(Clone, Debug)]
pub struct GetFile {
    pub domain: String,
    pub path: String,
    pub out_dir: PathBuf,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for GetFile {
    type Output = Payload;

    fn title(&self) -> String {
        format!("get {}", self.path)
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        let contents = ctx.guard(session.get_file(&self.domain, &self.path)).await?;
        let destination = self
            .out_dir
            .join(file_name_component(&ctx.target.alias))
            .join(file_name_component(remote_file_name(&self.path)));
        save(&destination, &contents).await?;
        Ok(Payload::Saved(destination))
    }
}

#[derive(Clone, Debug)]
pub struct CreateDirectory {
    pub domain: String,
    pub path: String,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for CreateDirectory {
    type Output = Payload;

    fn title(&self) -> String {
        format!("mkdir {}", self.path)
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        let step = format!("create directory {} in domain {}", self.path, self.domain);
        if self.dry_run {
            return Ok(Payload::DryRun(vec![step]));
        }
        ctx.guard(session.create_directory(&self.domain, &self.path))
            .await?;
        Ok(Payload::Done(format!("created {}", self.path)))
    }
}

#[derive(Clone, Debug)]
pub struct RemoveDirectory {
    pub domain: String,
    pub path: String,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for RemoveDirectory {
    type Output = Payload;

    fn title(&self) -> String {
        format!("rmdir {}", self.path)
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        if self.dry_run {
            return Ok(Payload::DryRun(vec![format!(
                "remove directory {} in domain {}",
                self.path, self.domain
            )]));
        }
        ctx.guard(session.remove_directory(&self.domain, &self.path))
            .await?;
        Ok(Payload::Done(format!("removed {}", self.path)))
    }
}

#[derive(Clone, Debug)]
pub struct RemoveFile {
    pub domain: String,
    pub path: String,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for RemoveFile {
    type Output = Payload;

    fn title(&self) -> String {
        format!("delete {}", self.path)
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        if self.dry_run {
            return Ok(Payload::DryRun(vec![format!(
                "delete {} in domain {}",
                self.path, self.domain
            )]));
        }
        ctx.guard(session.remove_file(&self.domain, &self.path))
            .await?;
        Ok(Payload::Done(format!("deleted {}", self.path)))
    }
}

/// Uploads the same contents to `path` on every appliance, replacing any existing file.
#[derive(Clone, Debug)]
pub struct SetFile {
    pub domain: String,
    pub path: String,
    pub contents: Arc<[u8]>,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for SetFile {
    type Output = Payload;

    fn title(&self) -> String {
        format!("set-file {}", self.path)
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        if self.dry_run {
            return Ok(Payload::DryRun(vec![format!(
                "write {} bytes to {} in domain {}",
                self.contents.len(),
                self.path,
                self.domain,
            )]));
        }
        ctx.guard(session.set_file(&self.domain, &self.path, &self.contents))
            .await?;
        Ok(Payload::Done(format!(
            "wrote {} bytes to {}",
            self.contents.len(),
            self.path
        )))
    }
}

/// Backs up `domains` on every appliance and saves each archive to
/// `out_dir/<alias>-<timestamp>-backup.zip`.
#[derive(Clone, Debug)]
pub struct TakeBackup {
    pub domains: Vec<String>,
    pub comment: Option<String>,
    pub out_dir: PathBuf,
    pub settings: JobSettings,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for TakeBackup {
    type Output = Payload;

    fn title(&self) -> String {
        format!("backup {}", self.domains.join(", "))
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        if self.dry_run {
            return Ok(Payload::DryRun(vec![format!(
                "back up {} into {}",
                self.domains.join(", "),
                self.out_dir.display(),
            )]));
        }

        let spec = JobSpec::Backup {
            domains: self.domains.clone(),
            comment: self.comment.clone(),
        };
        let report = run_job(session, &spec, ctx, &self.settings).await?;
        let archive = report.artifact.ok_or_else(|| {
            Failure::new(
                ErrorKind::ArtifactRetrievalFailed,
                format!("job {} left no archive", report.handle),
            )
        })?;

        let file_name = format!(
            "{}-{}-backup.zip",
            file_name_component(&ctx.target.alias),
            report.started_at.format("%Y%m%dT%H%M%S"),
        );
        let destination = self.out_dir.join(file_name);
        save(&destination, &archive).await?;
        Ok(Payload::Saved(destination))
    }
}

/// Restores `domains` on every appliance from one archive.
#[derive(Clone, Debug)]
pub struct RestoreBackup {
    pub domains: Vec<String>,
    pub archive: Arc<[u8]>,
    pub settings: JobSettings,
    pub dry_run: bool,
}

#[async_trait]
impl<S: ApplianceSession> Operation<S> for RestoreBackup {
    type Output = Payload;

    fn title(&self) -> String {
        format!("restore {}", self.domains.join(", "))
    }

    async fn run(&self, session: &mut S, ctx: &TargetContext) -> Result<Payload, Failure> {
        if self.dry_run {
            return Ok(Payload::DryRun(vec![format!(
                "restore {} from a {} byte archive",
                self.domains.join(", "),
                self.archive.len(),
            )]));
        }

        let spec = JobSpec::Restore {
            domains: self.domains.clone(),
            archive: self.archive.clone(),
        };
        let report = run_job(session, &spec, ctx, &self.settings).await?;
        Ok(Payload::Done(format!(
            "restored {} (job {}, {}s)",
            self.domains.join(", "),
            report.handle,
            report.elapsed.as_secs(),
        )))
    }
}

/// Writes `contents` to `path`, creating parent directories.
///
/// Local write errors are reported as [ErrorKind::ArtifactRetrievalFailed], since the artifact
/// never reached its destination.
async fn save(path: &Path, contents: &[u8]) -> Result<(), Failure> {
    let failed = |e: std::io::Error| {
        Failure::new(
            ErrorKind::ArtifactRetrievalFailed,
            format!("could not write {}: {e}", path.display()),
        )
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    tokio::fs::write(path, contents).await.map_err(failed)
}

/// Returns the last component of an appliance file path such as `local:///dir/file.xml`.
fn remote_file_name(path: &str) -> &str {
    path.rsplit(['/', ':']).find(|s| !s.is_empty()).unwrap_or(path)
}

/// Makes `name` safe to use as one local path component. Distinct names stay distinct.
fn file_name_component(name: &str) -> String {
    let all_dots = name.chars().all(|c| c == '.');
    let mut safe = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte.is_ascii_alphanumeric() || (b"-_.".contains(&byte) && !all_dots) {
            true => safe.push(char::from(byte)),
            false => safe.push_str(&format!("%{byte:02X}")),
        }
    }
    match safe.is_empty() {
        true => "%".to_owned(),
        false => safe,
    }
}
