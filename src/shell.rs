//! An interactive prompt that sends every line to the whole fleet.
//!
//! Each line the operator types is one [IssueCommand] dispatch, and its report is printed before
//! the next prompt. When every appliance answers the same way the output reads like a session with
//! a single appliance.

use crate::credential::Credentials;
use crate::dispatch::Dispatcher;
use crate::environment::ResolvedTarget;
use crate::ops::IssueCommand;
use crate::report::_report;
use crate::session::Connect;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::info;

/// Lines that end the session instead of being sent to the appliances.
const EXIT_COMMANDS: [&str; 2] = ["exit", "quit"];

/// A CLI session with every target at once.
pub struct Shell<C> {
    pub dispatcher: Dispatcher,
    pub connector: Arc<C>,
    pub targets: Vec<ResolvedTarget>,
    pub credentials: Credentials,
    pub domain: String,
}

impl<C: Connect + 'static> Shell<C> {
    /// Reads commands from `input` until it ends, an exit command is entered, or dispatch is
    /// cancelled.
    ///
    /// Returns 0 if every command succeeded on every appliance, else 1.
    pub async fn run<R, O, E>(&self, input: R, mut stdout: O, mut stderr: E) -> io::Result<u8>
    where
        R: AsyncBufRead + Unpin,
        O: Write,
        E: Write,
    {
        let cancel = self.dispatcher.cancellation_token();
        let mut lines = input.lines();
        let mut exit_code = 0;

        loop {
            write!(stdout, "{}> ", self.domain)?;
            stdout.flush()?;

            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                writeln!(stdout)?;
                break;
            };

            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            if EXIT_COMMANDS.contains(&command) {
                break;
            }

            info!(command, "sending to fleet");
            let operation = IssueCommand {
                commands: vec![command.to_owned()],
                domain: self.domain.clone(),
                dry_run: false,
            };
            let report = self
                .dispatcher
                .run(
                    self.connector.clone(),
                    &self.targets,
                    &self.credentials,
                    Arc::new(operation),
                )
                .await;
            _report(&mut stdout, &mut stderr, command, &report)?;
            exit_code = exit_code.max(report.exit_code());

            if cancel.is_cancelled() {
                break;
            }
        }

        Ok(exit_code)
    }
}
