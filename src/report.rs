//! Prints a [FleetReport] for the operator.
//!
//! Successful targets go to stdout and failed targets go to stderr, so a fleet-wide CLI session
//! can be piped without mixing in error text. [print_report] locks both streams for the whole
//! report; the logic lives in [_report], which takes any pair of writers so it can be tested.

use crate::dispatch::FleetReport;
use std::fmt::Display;
use std::io::{self, Write};

/// Prints `report` to the real stdout and stderr.
pub fn print_report<T: Display>(title: &str, report: &FleetReport<T>) -> io::Result<()> {
    let stdout = io::stdout().lock();
    let stderr = io::stderr().lock();
    _report(stdout, stderr, title, report)
}

/// A testable function containing the logic for printing a [FleetReport].
///
/// When more than one target succeeded with identical output and nothing failed, the output is
/// printed once under a heading that names every target.
pub fn _report<O: Write, E: Write, T: Display>(
    mut stdout: O,
    mut stderr: E,
    title: &str,
    report: &FleetReport<T>,
) -> io::Result<()> {
    if report.is_empty() {
        return writeln!(stdout, "No appliances selected for {title}");
    }

    if let Some(output) = shared_output(report) {
        let aliases: Vec<&str> = report.iter().map(|r| r.target.alias.as_str()).collect();
        writeln!(stdout, "[{}] Completed {title}", aliases.join(", "))?;
        write_indented(&mut stdout, &output)?;
    } else {
        for result in report.iter() {
            let alias = &result.target.alias;
            match &result.outcome {
                Ok(payload) => {
                    writeln!(stdout, "[{alias}] Completed {title}")?;
                    write_indented(&mut stdout, payload.to_string())?;
                }
                Err(failure) => {
                    writeln!(stderr, "[{alias}] Failed {title}")?;
                    write_indented(&mut stderr, failure.to_string())?;
                }
            }
        }
    }

    let succeeded = report.len() - report.failures().count();
    let summary = format!("{succeeded}/{} appliances succeeded", report.len());
    match report.all_succeeded() {
        true => writeln!(stdout, "{summary}"),
        false => writeln!(stderr, "{summary}"),
    }
}

/// Returns the common output if every target succeeded with the same non-empty output.
fn shared_output<T: Display>(report: &FleetReport<T>) -> Option<String> {
    if report.len() < 2 || !report.all_succeeded() {
        return None;
    }
    let mut outputs = report
        .iter()
        .filter_map(|r| r.outcome.as_ref().ok())
        .map(ToString::to_string);
    let first = outputs.next()?;
    match !first.is_empty() && outputs.all(|o| o == first) {
        true => Some(first),
        false => None,
    }
}

fn write_indented(mut writer: impl Write, content: impl AsRef<str>) -> io::Result<()> {
    for line in content.as_ref().lines() {
        //                1234
        writeln!(writer, "    {line}")?;
    }
    Ok(())
}
