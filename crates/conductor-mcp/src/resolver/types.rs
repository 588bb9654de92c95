//! Resolution results and diagnostics.

use std::path::PathBuf;

/// Successful resolution of a command to an executable path.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Absolute path to the executable.
    pub path: PathBuf,
    /// Every location checked on the way to this result, in order.
    pub probes: Vec<Probe>,
    /// Non-fatal notes (e.g., absolute path fell back to basename).
    pub warnings: Vec<String>,
}

/// One probed candidate location.
#[derive(Debug, Clone)]
pub struct Probe {
    /// The candidate path that was checked.
    pub path: PathBuf,
    /// What was found there.
    pub outcome: ProbeOutcome,
}

/// Outcome of probing one candidate path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Exists and is executable.
    Found,
    /// Nothing at this path.
    Missing,
    /// Exists but is not a regular file.
    NotAFile,
    /// Regular file without an executable bit.
    NotExecutable,
    /// Could not inspect the path.
    Denied,
    /// Other I/O failure.
    Io(String),
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found => write!(f, "found"),
            Self::Missing => write!(f, "missing"),
            Self::NotAFile => write!(f, "not a file"),
            Self::NotExecutable => write!(f, "not executable"),
            Self::Denied => write!(f, "permission denied"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

/// Resolution failure.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Command '{command}' not found. Searched:\n{}", format_searched(.searched))]
    CommandNotFound {
        /// The command that could not be resolved.
        command: String,
        /// Every directory (or absolute candidate) that was searched.
        searched: Vec<String>,
    },
}

impl ResolveError {
    /// Build a `CommandNotFound` from the probe trail, deduplicating
    /// directories while preserving order.
    pub fn not_found(command: impl Into<String>, probes: &[Probe]) -> Self {
        let mut seen = std::collections::HashSet::new();
        let searched = probes
            .iter()
            .filter_map(|p| p.path.parent().map(|d| d.display().to_string()))
            .filter(|dir| seen.insert(dir.clone()))
            .collect();

        Self::CommandNotFound {
            command: command.into(),
            searched,
        }
    }

    /// Directories searched, for diagnostics. Empty for `EmptyCommand`.
    #[must_use]
    pub fn searched_paths(&self) -> &[String] {
        match self {
            Self::EmptyCommand => &[],
            Self::CommandNotFound { searched, .. } => searched,
        }
    }
}

fn format_searched(searched: &[String]) -> String {
    if searched.is_empty() {
        return "  (no candidates checked)".to_string();
    }
    searched
        .iter()
        .map(|dir| format!("  - {dir}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_unique_directories() {
        let probes = vec![
            Probe {
                path: PathBuf::from("/usr/bin/doesnotexist"),
                outcome: ProbeOutcome::Missing,
            },
            Probe {
                path: PathBuf::from("/usr/local/bin/doesnotexist"),
                outcome: ProbeOutcome::Missing,
            },
            Probe {
                path: PathBuf::from("/usr/bin/doesnotexist"),
                outcome: ProbeOutcome::Missing,
            },
        ];

        let err = ResolveError::not_found("doesnotexist", &probes);
        let searched = err.searched_paths();
        assert_eq!(searched, &["/usr/bin", "/usr/local/bin"]);

        let rendered = err.to_string();
        assert!(rendered.contains("doesnotexist"));
        assert!(rendered.contains("/usr/local/bin"));
    }
}
