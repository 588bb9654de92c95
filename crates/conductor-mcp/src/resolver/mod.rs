//! Command-to-executable resolution.
//!
//! Turns a logical command name ("npx", "node", an absolute path) into
//! an absolute executable path. GUI-launched processes often inherit a
//! minimal PATH, so resolution goes well beyond `$PATH`: standard system
//! bin directories, Homebrew prefixes, per-user local bins, and Node
//! version-manager installs are all probed, and the resulting error
//! lists every directory searched.

mod env;
mod fs;
mod resolve;
mod search;
mod types;

pub use env::{EnvSource, SystemEnv};
pub use fs::{FileProbe, SystemProbe};
pub use resolve::{resolve, resolve_with};
pub use types::{Probe, ProbeOutcome, Resolution, ResolveError};

#[cfg(test)]
pub(crate) use env::MockEnv;
#[cfg(test)]
pub(crate) use fs::MockProbe;
