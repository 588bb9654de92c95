//! Main resolution logic.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::env::{EnvSource, SystemEnv};
use super::fs::{FileProbe, SystemProbe};
use super::search::candidate_dirs;
use super::types::{Probe, ProbeOutcome, Resolution, ResolveError};

/// Commands that ship alongside the Node runtime. When one of these is
/// not directly on any search path, `node` itself is resolved first and
/// the tool is probed as a sibling in the same directory.
const NODE_SIBLING_TOOLS: &[&str] = &["npx", "npm"];

/// Hard bound on the shell `command -v` fallback.
const SHELL_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve a command to an absolute executable path.
///
/// Search order:
/// 1. Absolute command: probe it directly (falling back to basename
///    search if the path is stale)
/// 2. Caller `PATH`, standard system bin dirs, `~/.local/bin`,
///    Node version-manager installs, caller-provided extra dirs
/// 3. For `npx`/`npm`: the directory of a resolved `node`
/// 4. A `command -v` shell lookup, bounded to 5 seconds
pub async fn resolve(command: &str, extra_dirs: &[String]) -> Result<Resolution, ResolveError> {
    match resolve_with(command, extra_dirs, &SystemEnv, &SystemProbe) {
        Ok(resolution) => Ok(resolution),
        Err(err @ ResolveError::EmptyCommand) => Err(err),
        Err(not_found) => shell_lookup_fallback(command, not_found).await,
    }
}

/// Resolve with injected environment and filesystem (for testing).
///
/// This is the synchronous core of [`resolve`]; it performs only
/// read-only filesystem probing and never spawns helpers.
pub fn resolve_with(
    command: &str,
    extra_dirs: &[String],
    env: &dyn EnvSource,
    probe: &dyn FileProbe,
) -> Result<Resolution, ResolveError> {
    if command.is_empty() {
        return Err(ResolveError::EmptyCommand);
    }

    let mut probes = Vec::new();
    let mut warnings = Vec::new();

    let command_path = Path::new(command);
    if command_path.is_absolute() {
        let outcome = probe.probe(command_path);
        probes.push(Probe {
            path: command_path.to_path_buf(),
            outcome: outcome.clone(),
        });

        if outcome == ProbeOutcome::Found {
            return Ok(Resolution {
                path: command_path.to_path_buf(),
                probes,
                warnings,
            });
        }

        // Stale absolute path: fall back to searching for the basename.
        let Some(basename) = command_path.file_name().and_then(|n| n.to_str()) else {
            return Err(ResolveError::not_found(command, &probes));
        };
        warnings.push(format!(
            "Absolute path '{command}' failed ({outcome}), falling back to basename '{basename}'"
        ));
        return search_dirs(basename, extra_dirs, env, probe, probes, warnings);
    }

    search_dirs(command, extra_dirs, env, probe, probes, warnings)
}

fn search_dirs(
    command: &str,
    extra_dirs: &[String],
    env: &dyn EnvSource,
    probe: &dyn FileProbe,
    mut probes: Vec<Probe>,
    warnings: Vec<String>,
) -> Result<Resolution, ResolveError> {
    for dir in candidate_dirs(env, extra_dirs) {
        let candidate = dir.join(command);
        let outcome = probe.probe(&candidate);
        probes.push(Probe {
            path: candidate.clone(),
            outcome: outcome.clone(),
        });
        if outcome == ProbeOutcome::Found {
            return Ok(Resolution {
                path: candidate,
                probes,
                warnings,
            });
        }
    }

    // npx/npm are installed next to node; locate the runtime and probe
    // its directory for the sibling tool.
    if NODE_SIBLING_TOOLS.contains(&command) {
        if let Some(node_dir) = resolve_node_dir(extra_dirs, env, probe) {
            let sibling = node_dir.join(command);
            let outcome = probe.probe(&sibling);
            probes.push(Probe {
                path: sibling.clone(),
                outcome: outcome.clone(),
            });
            if outcome == ProbeOutcome::Found {
                return Ok(Resolution {
                    path: sibling,
                    probes,
                    warnings,
                });
            }
        }
    }

    Err(ResolveError::not_found(command, &probes))
}

/// Directory containing a resolved `node` executable, if any.
fn resolve_node_dir(
    extra_dirs: &[String],
    env: &dyn EnvSource,
    probe: &dyn FileProbe,
) -> Option<PathBuf> {
    for dir in candidate_dirs(env, extra_dirs) {
        let candidate = dir.join("node");
        if probe.probe(&candidate) == ProbeOutcome::Found {
            return Some(dir);
        }
    }
    None
}

/// Last-resort lookup via the user's shell, bounded by a hard timeout
/// so a hung helper cannot block connection setup indefinitely.
#[cfg(unix)]
async fn shell_lookup_fallback(
    command: &str,
    not_found: ResolveError,
) -> Result<Resolution, ResolveError> {
    // Only simple names are safe to interpolate into the shell line.
    if !command
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
    {
        return Err(not_found);
    }

    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(format!("command -v {command}"))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);

    let output = match cmd.spawn() {
        Ok(child) => {
            match tokio::time::timeout(SHELL_LOOKUP_TIMEOUT, child.wait_with_output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(_)) | Err(_) => return Err(not_found),
            }
        }
        Err(_) => return Err(not_found),
    };

    if !output.status.success() {
        return Err(not_found);
    }

    let path_line = String::from_utf8_lossy(&output.stdout);
    let path = PathBuf::from(path_line.trim());
    if !path.is_absolute() || SystemProbe.probe(&path) != ProbeOutcome::Found {
        return Err(not_found);
    }

    tracing::debug!(command, path = %path.display(), "Resolved via shell lookup");
    Ok(Resolution {
        path: path.clone(),
        probes: vec![Probe {
            path,
            outcome: ProbeOutcome::Found,
        }],
        warnings: vec![format!("'{command}' located via shell lookup")],
    })
}

#[cfg(not(unix))]
async fn shell_lookup_fallback(
    _command: &str,
    not_found: ResolveError,
) -> Result<Resolution, ResolveError> {
    Err(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MockEnv, MockProbe};

    #[test]
    fn test_absolute_path_success() {
        let env = MockEnv::new();
        let probe = MockProbe::new().with_executable("/usr/local/bin/npx");

        let resolution = resolve_with("/usr/local/bin/npx", &[], &env, &probe).unwrap();
        assert_eq!(resolution.path, PathBuf::from("/usr/local/bin/npx"));
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_stale_absolute_path_falls_back_to_basename() {
        let env = MockEnv::new().with_var("PATH", "/opt/homebrew/bin");
        let probe = MockProbe::new().with_executable("/opt/homebrew/bin/npx");

        let resolution = resolve_with("/usr/local/bin/npx", &[], &env, &probe).unwrap();
        assert_eq!(resolution.path, PathBuf::from("/opt/homebrew/bin/npx"));
        assert!(!resolution.warnings.is_empty());
    }

    #[test]
    fn test_search_in_path() {
        let env = MockEnv::new().with_var("PATH", "/usr/bin:/usr/local/bin");
        let probe = MockProbe::new().with_executable("/usr/local/bin/deno");

        let resolution = resolve_with("deno", &[], &env, &probe).unwrap();
        assert_eq!(resolution.path, PathBuf::from("/usr/local/bin/deno"));
    }

    #[test]
    fn test_empty_command() {
        let env = MockEnv::new();
        let probe = MockProbe::new();
        assert!(matches!(
            resolve_with("", &[], &env, &probe),
            Err(ResolveError::EmptyCommand)
        ));
    }

    #[test]
    fn test_not_found_enumerates_system_dirs() {
        let env = MockEnv::new().with_var("PATH", "/usr/bin");
        let probe = MockProbe::new();

        let err = resolve_with("doesnotexist", &[], &env, &probe).unwrap_err();
        let searched = err.searched_paths();
        assert!(searched.contains(&"/usr/bin".to_string()));
        assert!(searched.contains(&"/usr/local/bin".to_string()));
        assert!(searched.contains(&"/bin".to_string()));
    }

    #[test]
    fn test_extra_dirs_are_searched() {
        let env = MockEnv::new();
        let probe = MockProbe::new().with_executable("/custom/bin/mytool");

        let resolution =
            resolve_with("mytool", &["/custom/bin".to_string()], &env, &probe).unwrap();
        assert_eq!(resolution.path, PathBuf::from("/custom/bin/mytool"));
    }

    #[test]
    fn test_npx_found_as_node_sibling() {
        // node lives in an nvm-style dir that is not on PATH for npx
        // directly, but npx sits next to it.
        let env = MockEnv::new().with_var("HOME", "/home/dev");
        let probe = MockProbe::new()
            .with_executable("/home/dev/.volta/bin/node")
            .with_executable("/home/dev/.volta/bin/npx");

        // Remove npx from direct probing by not registering it anywhere
        // else; the sibling step should still find it.
        let resolution = resolve_with("npx", &[], &env, &probe).unwrap();
        assert_eq!(resolution.path, PathBuf::from("/home/dev/.volta/bin/npx"));
    }

    #[test]
    fn test_non_executable_file_is_not_resolved() {
        let env = MockEnv::new().with_var("PATH", "/usr/bin");
        let probe = MockProbe::new().with_plain_file("/usr/bin/readme");

        let err = resolve_with("readme", &[], &env, &probe).unwrap_err();
        assert!(matches!(err, ResolveError::CommandNotFound { .. }));
    }

    #[tokio::test]
    async fn test_async_resolve_finds_sh() {
        // /bin/sh exists on any unix host this test runs on.
        let resolution = resolve("sh", &[]).await.unwrap();
        assert!(resolution.path.is_absolute());
    }

    #[tokio::test]
    async fn test_async_resolve_not_found() {
        let err = resolve("definitely-not-a-real-command-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CommandNotFound { .. }));
        assert!(!err.searched_paths().is_empty());
    }
}
