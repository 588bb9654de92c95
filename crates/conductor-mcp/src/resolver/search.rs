//! Candidate directory assembly.
//!
//! Produces the ordered list of directories a command is searched in:
//! caller PATH first, then standard system bin directories, per-user
//! local bins, Node version-manager installs, and caller extras.

use std::path::PathBuf;

use super::env::EnvSource;

#[cfg(unix)]
const PATH_SEPARATOR: char = ':';
#[cfg(windows)]
const PATH_SEPARATOR: char = ';';

/// Directories from the caller's `PATH`, in order.
pub(crate) fn path_dirs(env: &dyn EnvSource) -> Vec<PathBuf> {
    let Some(path_var) = env.var("PATH") else {
        return Vec::new();
    };
    let Some(path_str) = path_var.to_str() else {
        return Vec::new();
    };

    path_str
        .split(PATH_SEPARATOR)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Standard system install directories for this platform.
pub(crate) fn system_dirs() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin"), // Apple Silicon Homebrew
            PathBuf::from("/usr/local/bin"),    // Intel Homebrew / manual installs
            PathBuf::from("/usr/bin"),
            PathBuf::from("/bin"),
        ]
    }

    #[cfg(not(target_os = "macos"))]
    {
        vec![
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/usr/bin"),
            PathBuf::from("/bin"),
        ]
    }
}

/// Per-user install directories.
pub(crate) fn user_dirs(env: &dyn EnvSource) -> Vec<PathBuf> {
    env.home()
        .map(|home| vec![home.join(".local/bin")])
        .unwrap_or_default()
}

/// Node version-manager install directories (volta, asdf shims, nvm).
///
/// nvm keeps one `bin` directory per installed Node version; the default
/// alias is preferred, then versions newest-first.
pub(crate) fn version_manager_dirs(env: &dyn EnvSource) -> Vec<PathBuf> {
    let Some(home) = env.home() else {
        return Vec::new();
    };

    let mut dirs = vec![home.join(".volta/bin"), home.join(".asdf/shims")];

    let nvm_dir = home.join(".nvm");
    if nvm_dir.exists() {
        if let Ok(default_version) = std::fs::read_to_string(nvm_dir.join("alias/default")) {
            let version = default_version.trim();
            if !version.is_empty() {
                dirs.push(nvm_dir.join(format!("versions/node/{version}/bin")));
            }
        }

        if let Ok(entries) = std::fs::read_dir(nvm_dir.join("versions/node")) {
            let mut versions: Vec<String> = entries
                .filter_map(std::result::Result::ok)
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            versions.sort();

            for version in versions.iter().rev() {
                dirs.push(nvm_dir.join(format!("versions/node/{version}/bin")));
            }
        }
    }

    dirs
}

/// Full ordered candidate list, deduplicated.
pub(crate) fn candidate_dirs(env: &dyn EnvSource, extra_dirs: &[String]) -> Vec<PathBuf> {
    let mut dirs = path_dirs(env);
    dirs.extend(system_dirs());
    dirs.extend(user_dirs(env));
    dirs.extend(version_manager_dirs(env));
    dirs.extend(extra_dirs.iter().filter(|d| !d.is_empty()).map(PathBuf::from));

    let mut seen = std::collections::HashSet::new();
    dirs.retain(|dir| seen.insert(dir.clone()));
    dirs
}
