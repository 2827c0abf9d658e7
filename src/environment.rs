//! Expands logical environment names into concrete appliance targets.
//!
//! Resolution is purely a table lookup. It never touches the network, and both tables are loaded
//! once (see [crate::config::Inventory]) and never mutated afterwards.

use crate::error::ErrorKind;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Maps host aliases to network addresses.
///
/// Order is preserved from the source file but is unimportant for lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HostsTable(pub IndexMap<String, String>);

/// Maps environment names to the host aliases they contain, in declared order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EnvironmentsTable(pub IndexMap<String, Vec<String>>);

impl HostsTable {
    pub fn address(&self, alias: &str) -> Option<&str> {
        self.0.get(alias).map(String::as_str)
    }
}

impl EnvironmentsTable {
    pub fn aliases(&self, environment: &str) -> Option<&[String]> {
        self.0.get(environment).map(Vec::as_slice)
    }
}

impl<A: Into<String>, B: Into<String>> FromIterator<(A, B)> for HostsTable {
    fn from_iter<I: IntoIterator<Item = (A, B)>>(entries: I) -> Self {
        HostsTable(
            entries
                .into_iter()
                .map(|(alias, address)| (alias.into(), address.into()))
                .collect(),
        )
    }
}

impl<N, L, A> FromIterator<(N, L)> for EnvironmentsTable
where
    N: Into<String>,
    L: IntoIterator<Item = A>,
    A: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, L)>>(entries: I) -> Self {
        EnvironmentsTable(
            entries
                .into_iter()
                .map(|(name, aliases)| (name.into(), aliases.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }
}

/// One appliance selected by a resolution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedTarget {
    pub alias: String,
    pub address: String,
}

impl ResolvedTarget {
    pub fn new(alias: impl Into<String>, address: impl Into<String>) -> Self {
        ResolvedTarget {
            alias: alias.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.alias == self.address {
            true => write!(f, "{}", self.alias),
            false => write!(f, "{} ({})", self.alias, self.address),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("environment {environment} lists unknown host alias {alias}")]
    UnknownHost { environment: String, alias: String },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::UnknownEnvironment(_) => ErrorKind::UnknownEnvironment,
            ResolveError::UnknownHost { .. } => ErrorKind::UnknownHost,
        }
    }
}

/// Resolves `environment` into its targets.
///
/// Aliases keep their declared order. A duplicated alias yields one target, at the position of its
/// first occurrence.
pub fn resolve(
    environment: &str,
    hosts: &HostsTable,
    environments: &EnvironmentsTable,
) -> Result<Vec<ResolvedTarget>, ResolveError> {
    let mut resolution = Resolution::default();
    resolution.add_environment(environment, hosts, environments)?;
    Ok(resolution.finish())
}

/// Resolves a mixed list of environment names, host aliases, and literal addresses.
///
/// Each name is tried as an environment first, then as a host alias. A name that looks like an
/// address (an IP address, or a host name containing `.` or `:`) becomes a target whose alias is
/// the address itself. Any other name is [ResolveError::UnknownEnvironment]. Targets are
/// de-duplicated by alias across the whole list.
pub fn resolve_appliances<S: AsRef<str>>(
    names: &[S],
    hosts: &HostsTable,
    environments: &EnvironmentsTable,
) -> Result<Vec<ResolvedTarget>, ResolveError> {
    let mut resolution = Resolution::default();
    for name in names {
        let name = name.as_ref();
        if environments.aliases(name).is_some() {
            resolution.add_environment(name, hosts, environments)?;
        } else if let Some(address) = hosts.address(name) {
            resolution.add(name, address);
        } else if looks_like_address(name) {
            resolution.add(name, name);
        } else {
            return Err(ResolveError::UnknownEnvironment(name.to_owned()));
        }
    }
    Ok(resolution.finish())
}

/// Bare words are environment names or aliases, so a misspelt one is never dialed.
fn looks_like_address(name: &str) -> bool {
    name.parse::<IpAddr>().is_ok() || name.contains(['.', ':'])
}

/// Accumulates targets in first-occurrence order.
#[derive(Default)]
struct Resolution {
    seen: IndexSet<String>,
    targets: Vec<ResolvedTarget>,
}

impl Resolution {
    fn add(&mut self, alias: &str, address: &str) {
        if self.seen.insert(alias.to_owned()) {
            self.targets.push(ResolvedTarget::new(alias, address));
        }
    }

    fn add_environment(
        &mut self,
        environment: &str,
        hosts: &HostsTable,
        environments: &EnvironmentsTable,
    ) -> Result<(), ResolveError> {
        let aliases = environments
            .aliases(environment)
            .ok_or_else(|| ResolveError::UnknownEnvironment(environment.to_owned()))?;

        for alias in aliases {
            let address = hosts
                .address(alias)
                .ok_or_else(|| ResolveError::UnknownHost {
                    environment: environment.to_owned(),
                    alias: alias.clone(),
                })?;
            self.add(alias, address);
        }
        Ok(())
    }

    fn finish(self) -> Vec<ResolvedTarget> {
        self.targets
    }
}
