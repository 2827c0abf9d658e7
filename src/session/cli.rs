//! Command builders and output parsers for the appliance's interactive CLI.
//!
//! These are shared by any [Connect] implementation that drives the CLI rather than a management
//! API, such as [crate::session::openssh].
//!
//! [Connect]: crate::session::Connect

use crate::session::{FileEntry, FileKind};
use regex::Regex;
use std::sync::OnceLock;

/// Prefix the appliance CLI uses for error lines, e.g. `% Unknown command or macro`.
const ERROR_PREFIX: &str = "% ";

/// Quotes a CLI argument if it contains white space or quotes.
pub fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"') {
        return arg.to_owned();
    }
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn switch_domain(domain: &str) -> String {
    format!("switch domain {}", quote(domain))
}

pub fn dir(location: &str) -> String {
    format!("dir {}", quote(location))
}

pub fn mkdir(path: &str) -> String {
    format!("mkdir {}", quote(path))
}

pub fn rmdir(path: &str) -> String {
    format!("rmdir {}", quote(path))
}

pub fn delete(path: &str) -> String {
    format!("delete {}", quote(path))
}

/// Returns the first CLI error line in `output`, if any, without its `% ` prefix.
pub fn error_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix(ERROR_PREFIX))
        .map(str::trim)
}

/// Parses the output of [dir] into entries.
///
/// Lines that do not look like entries (headers, rulers, the free-space footer) are skipped.
/// Directory names are printed with a trailing `/`, which is stripped here.
pub fn parse_listing(output: &str) -> Vec<FileEntry> {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    let entry = ENTRY.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<name>\S+)\s+(?P<modified>[A-Z][a-z]{2} [A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2} \d{4})(?:\s+(?P<size>\d+))?\s*$",
        )
        .expect("listing pattern is valid")
    });

    output
        .lines()
        .filter_map(|line| entry.captures(line))
        .map(|caps| {
            let name = &caps["name"];
            let modified = Some(caps["modified"].to_owned());
            let size = caps.name("size").and_then(|s| s.as_str().parse().ok());
            match name.strip_suffix('/') {
                Some(dir) => FileEntry {
                    name: dir.to_owned(),
                    kind: FileKind::Directory,
                    size: None,
                    modified,
                },
                None => FileEntry {
                    name: name.to_owned(),
                    kind: FileKind::File,
                    size,
                    modified,
                },
            }
        })
        .collect()
}
