use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use dpfleet::config::{self, Inventory, Settings};
use dpfleet::credential::{self, Credentials};
use dpfleet::dispatch::{Dispatcher, Operation};
use dpfleet::environment::ResolvedTarget;
use dpfleet::logging;
use dpfleet::ops::{self, Payload};
use dpfleet::report::print_report;
use dpfleet::session::openssh::{SshConnector, SshSession};
use dpfleet::shell;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Exit code for mistakes that stop an invocation before anything is dispatched.
const CONFIGURATION_ERROR: u8 = 2;

/// Runs commands and file operations across fleets of DataPower appliances.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Directory holding hosts.yaml, environments.yaml, and settings.yaml.
    #[arg(long, env = "DPFLEET_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Log more. Repeat for even more.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Which appliances to work on, and as whom.
#[derive(Debug, Args)]
struct Fleet {
    /// An environment name, host alias, or address. Repeat to add more.
    #[arg(short, long = "appliances", required = true)]
    appliances: Vec<String>,

    /// username:password, or its obfuscated form from `dpfleet xor`. Pass once to share it, or
    /// once per appliance in resolution order.
    #[arg(
        short,
        long = "credentials",
        env = "DPFLEET_CREDENTIALS",
        hide_env_values = true,
        required = true
    )]
    credentials: Vec<String>,

    /// Work on at most this many appliances at once.
    #[arg(long)]
    max_in_flight: Option<NonZeroUsize>,
}

#[derive(Debug, Args)]
struct Domain {
    /// The application domain to work in.
    #[arg(short, long, default_value = "default")]
    domain: String,
}

#[derive(Debug, Args)]
struct DryRun {
    /// Connect and report what would change, but change nothing.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct Job {
    /// Seconds to wait for each appliance's job. Defaults to job_timeout_secs from settings.yaml.
    #[arg(short, long)]
    timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run CLI commands on every appliance.
    IssueCommand {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,
        #[command(flatten)]
        dry_run: DryRun,

        /// A file of CLI commands, one per line, run after any given on the command line.
        #[arg(short, long)]
        input_file: Option<PathBuf>,

        #[arg(required_unless_present = "input_file")]
        commands: Vec<String>,
    },

    /// Read CLI commands from the terminal and run each on every appliance.
    Shell {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,
    },

    /// List a filestore location on every appliance.
    ListFilestore {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,

        #[arg(default_value = "local:")]
        location: String,
    },

    /// Download a file from every appliance into OUT_DIR/<alias>/.
    GetFile {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,

        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        path: String,
    },

    /// Create a filestore directory on every appliance.
    CreateDirectory {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,
        #[command(flatten)]
        dry_run: DryRun,

        path: String,
    },

    /// Remove a filestore directory on every appliance.
    RemoveDirectory {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,
        #[command(flatten)]
        dry_run: DryRun,

        path: String,
    },

    /// Upload a local file to the same path on every appliance.
    SetFile {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,
        #[command(flatten)]
        dry_run: DryRun,

        /// The local file to upload.
        #[arg(short, long)]
        file: PathBuf,

        path: String,
    },

    /// Delete a file on every appliance.
    RemoveFile {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        domain: Domain,
        #[command(flatten)]
        dry_run: DryRun,

        path: String,
    },

    /// Back up domains on every appliance into OUT_DIR.
    TakeBackup {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        job: Job,
        #[command(flatten)]
        dry_run: DryRun,

        #[arg(short = 'D', long = "domains", default_value = "all-domains")]
        domains: Vec<String>,

        #[arg(long)]
        comment: Option<String>,

        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Restore domains on every appliance from one backup archive.
    RestoreBackup {
        #[command(flatten)]
        fleet: Fleet,
        #[command(flatten)]
        job: Job,
        #[command(flatten)]
        dry_run: DryRun,

        #[arg(short = 'D', long = "domains", default_value = "all-domains")]
        domains: Vec<String>,

        /// The backup archive to restore.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the obfuscated form of a username:password credential.
    Xor { credential: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(CONFIGURATION_ERROR)
        }
    }
}

/// Everything loaded from the configuration directory.
struct Setup {
    inventory: Inventory,
    settings: Settings,
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config_dir = config::find_config_dir(cli.config_dir.as_deref());
    let settings = Settings::load(&config_dir)?;

    if let Command::Xor { credential: raw } = &cli.command {
        let key = settings.obfuscation_key()?;
        let decoded = credential::decode(raw, &key)?;
        println!("{}", credential::encode_obfuscated(&decoded, &key));
        return Ok(0);
    }

    let setup = Setup {
        inventory: Inventory::load(&config_dir)?,
        settings,
    };
    let job_settings = |job: &Job| {
        setup
            .settings
            .job_settings(job.timeout.map(Duration::from_secs))
    };

    use Command::*;
    match cli.command {
        IssueCommand {
            fleet,
            domain,
            dry_run,
            input_file,
            mut commands,
        } => {
            if let Some(path) = input_file {
                let script = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("could not read {}", path.display()))?;
                commands.extend(ops::read_commands(&script));
            }
            if commands.is_empty() {
                bail!("no commands to run");
            }
            let op = ops::IssueCommand {
                commands,
                domain: domain.domain,
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        Shell { fleet, domain } => {
            let (dispatcher, targets, credentials) = prepare(&setup, &fleet)?;
            let shell = shell::Shell {
                dispatcher,
                connector: Arc::new(SshConnector),
                targets,
                credentials,
                domain: domain.domain,
            };
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            Ok(shell.run(stdin, io::stdout(), io::stderr()).await?)
        }
        ListFilestore {
            fleet,
            domain,
            location,
        } => {
            let op = ops::ListFilestore {
                domain: domain.domain,
                location,
            };
            dispatch(&setup, &fleet, op).await
        }
        GetFile {
            fleet,
            domain,
            out_dir,
            path,
        } => {
            let op = ops::GetFile {
                domain: domain.domain,
                path,
                out_dir,
            };
            dispatch(&setup, &fleet, op).await
        }
        CreateDirectory {
            fleet,
            domain,
            dry_run,
            path,
        } => {
            let op = ops::CreateDirectory {
                domain: domain.domain,
                path,
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        RemoveDirectory {
            fleet,
            domain,
            dry_run,
            path,
        } => {
            let op = ops::RemoveDirectory {
                domain: domain.domain,
                path,
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        SetFile {
            fleet,
            domain,
            dry_run,
            file,
            path,
        } => {
            let op = ops::SetFile {
                domain: domain.domain,
                path,
                contents: read_local(&file).await?,
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        RemoveFile {
            fleet,
            domain,
            dry_run,
            path,
        } => {
            let op = ops::RemoveFile {
                domain: domain.domain,
                path,
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        TakeBackup {
            fleet,
            job,
            dry_run,
            domains,
            comment,
            out_dir,
        } => {
            let op = ops::TakeBackup {
                domains,
                comment,
                out_dir,
                settings: job_settings(&job),
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        RestoreBackup {
            fleet,
            job,
            dry_run,
            domains,
            file,
        } => {
            let op = ops::RestoreBackup {
                domains,
                archive: read_local(&file).await?,
                settings: job_settings(&job),
                dry_run: dry_run.dry_run,
            };
            dispatch(&setup, &fleet, op).await
        }
        Xor { .. } => Ok(0),
    }
}

/// Resolves `fleet` and decodes its credentials, and returns a [Dispatcher] that Ctrl-C cancels.
fn prepare(
    setup: &Setup,
    fleet: &Fleet,
) -> anyhow::Result<(Dispatcher, Vec<ResolvedTarget>, Credentials)> {
    let targets = setup
        .inventory
        .resolve(fleet.appliances.as_slice())
        .context("could not resolve appliances")?;

    let key = setup.settings.obfuscation_key()?;
    let decoded = fleet
        .credentials
        .iter()
        .map(|raw| credential::decode(raw, &key))
        .collect::<Result<Vec<_>, _>>()?;
    let credentials = Credentials::for_targets(decoded, targets.len())?;

    let dispatcher = Dispatcher::new()
        .with_max_in_flight(fleet.max_in_flight.or(setup.settings.max_in_flight));
    let cancel = dispatcher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling outstanding work");
            cancel.cancel();
        }
    });

    Ok((dispatcher, targets, credentials))
}

/// Resolves `fleet`, runs `operation` on it, prints the report, and returns the exit code.
async fn dispatch<O>(setup: &Setup, fleet: &Fleet, operation: O) -> anyhow::Result<u8>
where
    O: Operation<SshSession, Output = Payload> + 'static,
{
    let (dispatcher, targets, credentials) = prepare(setup, fleet)?;

    let title = operation.title();
    let report = dispatcher
        .run(
            Arc::new(SshConnector),
            &targets,
            &credentials,
            Arc::new(operation),
        )
        .await;

    print_report(&title, &report)?;
    Ok(report.exit_code())
}

async fn read_local(path: &Path) -> anyhow::Result<Arc<[u8]>> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    Ok(contents.into())
}
