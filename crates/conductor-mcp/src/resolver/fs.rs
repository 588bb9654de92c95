//! Filesystem probe trait for testable resolution.

use std::path::Path;

use super::types::ProbeOutcome;

/// Checks whether a candidate path is a usable executable
/// (injectable for testing). Probing is strictly read-only.
pub trait FileProbe {
    /// Inspect one candidate path.
    fn probe(&self, path: &Path) -> ProbeOutcome;
}

/// Production probe using real filesystem metadata.
pub struct SystemProbe;

impl FileProbe for SystemProbe {
    fn probe(&self, path: &Path) -> ProbeOutcome {
        if !path.exists() {
            return ProbeOutcome::Missing;
        }

        if !path.is_file() {
            return ProbeOutcome::NotAFile;
        }

        // Executable-bit check is Unix-only; elsewhere existence suffices.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            match std::fs::metadata(path) {
                Ok(metadata) => {
                    if metadata.permissions().mode() & 0o111 == 0 {
                        return ProbeOutcome::NotExecutable;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    return ProbeOutcome::Denied;
                }
                Err(e) => {
                    return ProbeOutcome::Io(e.to_string());
                }
            }
        }

        ProbeOutcome::Found
    }
}

/// Mock probe with predefined responses.
#[cfg(test)]
#[derive(Default)]
pub struct MockProbe {
    executables: std::collections::HashSet<std::path::PathBuf>,
    plain_files: std::collections::HashSet<std::path::PathBuf>,
}

#[cfg(test)]
impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_executable(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.executables.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_plain_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.plain_files.insert(path.into());
        self
    }
}

#[cfg(test)]
impl FileProbe for MockProbe {
    fn probe(&self, path: &Path) -> ProbeOutcome {
        if self.executables.contains(path) {
            ProbeOutcome::Found
        } else if self.plain_files.contains(path) {
            ProbeOutcome::NotExecutable
        } else {
            ProbeOutcome::Missing
        }
    }
}
