//! External command execution

use crate::error::Result;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// A single external command: program plus argument vector
///
/// Arguments are passed to the process directly, never through a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Create an invocation of `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Run this invocation through `wrapper` (e.g. `sudo`)
    pub fn wrapped_in(self, wrapper: &Path) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program.into_os_string());
        args.extend(self.args);
        Self {
            program: wrapper.to_path_buf(),
            args,
        }
    }

    /// Program base name, for logs and matching
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, silent result
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    /// A failed result with the given exit code and stderr
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status 0
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The text to show a user when this command failed
    ///
    /// Prefers stderr, falls back to stdout, then to a generic message.
    pub fn failure_text(&self) -> String {
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim_end();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("command exited with status {} and no output", code),
            None => "command was terminated by a signal".to_string(),
        }
    }
}

/// Trait for running external commands
///
/// The provisioning pipeline only talks to the outside world through this
/// trait, so tests can substitute a recording implementation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion and capture its output
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be started; a non-zero
    /// exit is reported through [`CommandOutput::exit_code`].
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Runs commands as child processes of the current process
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("failed to execute {}: {}", invocation.program.display(), e),
                )
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
