//! Child process PATH assembly and working-directory validation.

use std::env;
use std::ffi::OsString;
use std::path::Path;

#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Baseline entries for children launched from a minimal environment
/// (GUI-launched parents often carry a near-empty PATH).
#[cfg(target_os = "macos")]
const BASELINE_PATHS: &str = "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";
#[cfg(all(unix, not(target_os = "macos")))]
const BASELINE_PATHS: &str = "/usr/local/bin:/usr/bin:/bin";

/// Build the `PATH` value for a spawned server process.
///
/// Includes, in order:
/// 1. The directory containing the resolved executable (so scripts can
///    find their interpreters)
/// 2. The current process `PATH`
/// 3. Baseline system directories for this platform
/// 4. Caller-provided extra directories
///
/// Entries are deduplicated, preserving first occurrence.
pub fn build_child_path(exe_path: &Path, extra_dirs: &[String]) -> OsString {
    let mut entries = Vec::new();

    if let Some(dir) = exe_path.parent().and_then(Path::to_str) {
        entries.push(dir.to_string());
    }

    if let Some(current) = env::var_os("PATH") {
        if let Some(current) = current.to_str() {
            entries.extend(
                current
                    .split(PATH_SEPARATOR)
                    .filter(|e| !e.is_empty())
                    .map(String::from),
            );
        }
    }

    #[cfg(unix)]
    entries.extend(BASELINE_PATHS.split(':').map(String::from));

    entries.extend(extra_dirs.iter().filter(|d| !d.is_empty()).cloned());

    let mut seen = std::collections::HashSet::new();
    let deduped: Vec<String> = entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    OsString::from(deduped.join(PATH_SEPARATOR))
}

/// Validate a working directory before spawning into it.
pub fn validate_working_dir(cwd: &str) -> Result<(), String> {
    let path = Path::new(cwd);

    if !path.exists() {
        return Err(format!("Working directory does not exist: {cwd}"));
    }

    if !path.is_dir() {
        return Err(format!("Working directory path is not a directory: {cwd}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_child_path_includes_exe_dir_first() {
        let path = build_child_path(&PathBuf::from("/opt/homebrew/bin/npx"), &[]);
        let path_str = path.to_str().unwrap();
        assert!(path_str.starts_with("/opt/homebrew/bin"));
    }

    #[test]
    fn test_child_path_deduplicates_entries() {
        let path = build_child_path(
            &PathBuf::from("/usr/bin/node"),
            &["/usr/bin".to_string(), "/custom/path".to_string()],
        );
        let path_str = path.to_str().unwrap();

        let entries: Vec<&str> = path_str.split(PATH_SEPARATOR).collect();
        let count = entries.iter().filter(|&&e| e == "/usr/bin").count();
        assert_eq!(count, 1);
        assert!(entries.contains(&"/custom/path"));
    }

    #[test]
    fn test_child_path_includes_baseline_dirs() {
        let path = build_child_path(&PathBuf::from("/somewhere/tool"), &[]);
        let path_str = path.to_str().unwrap();
        assert!(path_str.contains("/usr/bin"));
    }

    #[test]
    fn test_validate_working_dir_rejects_nonexistent() {
        let result = validate_working_dir("/nonexistent/directory");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("does not exist"));
    }

    #[test]
    fn test_validate_working_dir_rejects_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = validate_working_dir(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_working_dir_accepts_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_working_dir(dir.path().to_str().unwrap()).is_ok());
    }
}
