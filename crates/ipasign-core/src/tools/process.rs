//! Thin wrappers around `tokio::process::Command` for running located tools.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{ResignError, Result};
use crate::tools::Tool;

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn into_failure(self, tool: Tool) -> ResignError {
        ResignError::ExternalToolFailure {
            tool: tool.to_string(),
            exit_code: self.exit_code,
            output: self.combined(),
        }
    }
}

/// Runs a tool and captures stdout and stderr, whatever the exit status.
pub async fn run_captured<I, S>(tool: Tool, program: &Path, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!("Running {:?}", command.as_std());

    let output = command.output().await.map_err(|e| ResignError::ToolLaunch {
        tool: tool.to_string(),
        source: e,
    })?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Runs a tool and turns a non-zero exit into `ExternalToolFailure`.
pub async fn run_checked<I, S>(tool: Tool, program: &Path, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_captured(tool, program, args).await?;
    if !output.success() {
        return Err(output.into_failure(tool));
    }
    Ok(output)
}

/// Runs a tool with output discarded, consulting only the exit status.
///
/// Used for archive tools, whose output on large archives would otherwise
/// fill the pipe buffers.
pub async fn run_quiet<I, S>(
    tool: Tool,
    program: &Path,
    args: I,
    current_dir: Option<&Path>,
) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }

    tracing::debug!("Running {:?}", command.as_std());

    let status = command.status().await.map_err(|e| ResignError::ToolLaunch {
        tool: tool.to_string(),
        source: e,
    })?;

    if !status.success() {
        return Err(ResignError::ExternalToolFailure {
            tool: tool.to_string(),
            exit_code: status.code().unwrap_or(-1),
            output: String::new(),
        });
    }
    Ok(())
}

/// Quotes a value for safe interpolation into a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
