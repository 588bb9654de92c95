//! Launch configuration for MCP server processes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Immutable launch configuration for one MCP server.
///
/// Supplied by the embedding layer (config editor, UI, tests) and never
/// mutated by the core. `command` can be a bare name (resolved against
/// PATH plus platform install directories) or an absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique, user-friendly server name. Doubles as the registry key.
    pub name: String,

    /// Executable name or absolute path (e.g., "npx" or "/usr/bin/node").
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables overlaid on the baseline environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for the process (must be absolute if specified).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Additional directories searched during command resolution and
    /// prepended to the child PATH. Useful for nvm/asdf shims.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_dirs: Vec<String>,
}

impl ServerConfig {
    /// Create a configuration for `command` with no arguments.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            extra_dirs: Vec::new(),
        }
    }

    /// Set the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an extra search/PATH directory.
    #[must_use]
    pub fn with_extra_dir(mut self, dir: impl Into<String>) -> Self {
        self.extra_dirs.push(dir.into());
        self
    }

    /// Validate the configuration shape.
    ///
    /// Checks that the command is present and is a single token (flags
    /// belong in `args`), and that `cwd` is absolute if given. Existence
    /// of paths is checked later, at resolve/spawn time.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.command.is_empty() {
            return Err("Server command cannot be empty".to_string());
        }

        if self.command.contains(char::is_whitespace) {
            return Err(
                "Command must be an executable name/path only (e.g., 'npx'). \
                 Put flags and arguments in the 'args' field."
                    .to_string(),
            );
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_empty() && !std::path::Path::new(cwd).is_absolute() {
                return Err(format!("Working directory must be absolute: {cwd}"));
            }
        }

        Ok(())
    }
}
