//! Runs operations across fleets of DataPower appliances.
//!
//! # Program flow
//!
//! 1. The operator names one or more environments, host aliases, or addresses. [environment]
//!    resolves them against the tables loaded by [config] into an ordered, de-duplicated list of
//!    targets.
//!
//! 2. [credential] decodes the operator's credentials, plaintext or obfuscated, into one shared
//!    [credential::Credential] or one per target.
//!
//! 3. [dispatch::Dispatcher] runs one [dispatch::Operation] per target concurrently, each over its
//!    own [session::ApplianceSession]. Failures, including panics, stay with the target that
//!    raised them. Long-running jobs such as backups are driven by [job::run_job].
//!
//! 4. The resulting [dispatch::FleetReport] lists one outcome per target, in resolution order.
//!    [report] prints it.
//!
//! [shell::Shell] repeats steps 3 and 4 for every line the operator types.

pub mod config;
pub mod credential;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod job;
pub mod logging;
pub mod ops;
pub mod report;
pub mod session;
pub mod shell;

#[doc(inline)]
pub use dispatch::{Dispatcher, FleetReport};
#[doc(inline)]
pub use error::{ErrorKind, Failure};
