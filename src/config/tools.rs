//! External tool invocation
//!
//! Tools are described as a program plus an argument vector and launched
//! directly, never through a shell.

use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{SnapvaultError, SnapvaultResult};

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program name (looked up on `PATH`) or path
    pub program: String,
    /// Arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Locate the program on disk
    pub fn resolve(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 || program.is_absolute() {
            return program.is_file().then(|| program.to_path_buf());
        }
        let path = env::var_os("PATH")?;
        env::split_paths(&path)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    /// Fail with a configuration error unless the program can be found
    pub fn require(&self, purpose: &str) -> SnapvaultResult<PathBuf> {
        self.resolve().ok_or_else(|| {
            SnapvaultError::Config(format!("{} tool not found: {}", purpose, self.program))
        })
    }

    /// Build a `Command` for this program and arguments
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args.iter().map(OsStr::new));
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Overrides for the external tools snapvault may call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverrides {
    /// Command that writes the full graph model as JSON to stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_export: Option<CommandSpec>,

    /// Command run after a restore, receiving the restored paths as arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_verify: Option<CommandSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let spec = CommandSpec::new("python", ["manage.py", "export_graph"]);
        assert_eq!(spec.to_string(), "python manage.py export_graph");
    }

    #[test]
    fn test_missing_absolute_program() {
        let spec = CommandSpec::new("/definitely/not/here/exporter", Vec::<String>::new());
        assert!(spec.resolve().is_none());
        assert!(matches!(spec.require("graph export"), Err(SnapvaultError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_on_path() {
        let spec = CommandSpec::new("sh", Vec::<String>::new());
        assert!(spec.resolve().is_some());
    }

    #[test]
    fn test_overrides_serde_skip_none() {
        let json = serde_json::to_string(&ToolOverrides::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
