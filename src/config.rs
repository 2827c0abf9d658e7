//! Loads host inventory and settings from the configuration directory.
//!
//! The directory holds up to three YAML files, each optional:
//!
//! * `hosts.yaml` maps host aliases to addresses ([HostsTable]).
//! * `environments.yaml` maps environment names to lists of host aliases ([EnvironmentsTable]).
//! * `settings.yaml` holds [Settings].
//!
//! A missing file means an empty table or default settings. A file that exists but cannot be
//! parsed is an error.

use crate::credential::ObfuscationKey;
use crate::environment::{
    resolve_appliances, EnvironmentsTable, HostsTable, ResolveError, ResolvedTarget,
};
use crate::job::JobSettings;
use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HOSTS_FILE: &str = "hosts.yaml";
pub const ENVIRONMENTS_FILE: &str = "environments.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Returns a [PathBuf] to the system-wide configuration directory.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/dpfleet`.
/// Otherwise, it returns `/etc/dpfleet`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/dpfleet";

    let mut path = PathBuf::new();

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }
    #[cfg(not(test))]
    path.push("/");

    path.push(CONFIG_DIR);
    path
}

/// Picks the configuration directory: `explicit` if given, else `~/.dpfleet` if it exists, else
/// [config_dir].
pub fn find_config_dir(explicit: Option<&Path>) -> PathBuf {
    choose_config_dir(explicit, home::home_dir())
}

fn choose_config_dir(explicit: Option<&Path>, home: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    home.map(|home| home.join(".dpfleet"))
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(config_dir)
}

/// The host and environment tables. Loaded once, never modified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    pub hosts: HostsTable,
    pub environments: EnvironmentsTable,
}

impl Inventory {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        Ok(Inventory {
            hosts: load_yaml(&dir.join(HOSTS_FILE))?,
            environments: load_yaml(&dir.join(ENVIRONMENTS_FILE))?,
        })
    }

    /// Resolves environment names, host aliases, and addresses. See [resolve_appliances].
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ResolvedTarget>, ResolveError> {
        resolve_appliances(names, &self.hosts, &self.environments)
    }
}

/// Tunables from `settings.yaml`. Every key is optional.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// The key for obfuscated credentials.
    pub obfuscation_key: String,

    /// How many appliances to work on at once. Unbounded when absent.
    pub max_in_flight: Option<NonZeroUsize>,
    pub job_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let job = JobSettings::default();
        Settings {
            obfuscation_key: "_".to_string(),
            max_in_flight: None,
            job_timeout_secs: job.timeout.as_secs(),
            poll_interval_secs: job.poll_interval.as_secs(),
            max_poll_interval_secs: job.max_poll_interval.as_secs(),
        }
    }
}

impl Settings {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        load_yaml(&dir.join(SETTINGS_FILE))
    }

    pub fn obfuscation_key(&self) -> anyhow::Result<ObfuscationKey> {
        match ObfuscationKey::new(self.obfuscation_key.as_bytes()) {
            Some(key) => Ok(key),
            None => bail!("obfuscation_key in {SETTINGS_FILE} must not be empty"),
        }
    }

    /// Returns the job settings, with `timeout` overriding `job_timeout_secs` if given.
    pub fn job_settings(&self, timeout: Option<Duration>) -> JobSettings {
        JobSettings {
            timeout: timeout.unwrap_or(Duration::from_secs(self.job_timeout_secs)),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_poll_interval: Duration::from_secs(self.max_poll_interval_secs),
        }
    }
}

/// Parses `path` as YAML. A missing or empty file yields `T::default()`.
fn load_yaml<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e).with_context(|| format!("could not read {}", path.display())),
    };
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&contents).with_context(|| format!("could not parse {}", path.display()))
}
