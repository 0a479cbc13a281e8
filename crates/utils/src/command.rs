use std::path::Path;
use std::process::{Command, Output, Stdio};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;

use crate::path::PathQuotedDisplay;

/// Format a command (and its arguments) the way it would be typed at a shell,
/// for debug logging.
fn format_for_log(cmd: &Command) -> String {
    let mut s = PathQuotedDisplay::new(&Path::new(cmd.get_program())).to_string();
    for arg in cmd.get_args() {
        s.push(' ');
        s.push_str(&PathQuotedDisplay::new(&Path::new(arg)).to_string());
    }
    s
}

fn require_success(cmd: &Command, output: Output) -> Result<Output> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "Child {:?} exited with status {}: {}",
            cmd.get_program(),
            output.status,
            stderr.trim()
        ));
    }
    Ok(output)
}

/// Convenience methods for synchronously running helper processes (mkfs,
/// lsblk, sfdisk, and friends) and getting typed results back. Mirrors the
/// shape of the black-box helper invocation contract in the job engine: we
/// never parse anything from a helper beyond its exit status, stdout and
/// stderr.
pub trait CommandRunExt {
    /// Emit the command line at debug level before running, and return self
    /// for further chaining.
    fn log_debug(&mut self) -> &mut Self;

    /// Run the command to completion, discarding stdout, requiring success.
    fn run(&mut self) -> Result<()>;

    /// Run the command, capture stdout as UTF-8, requiring success. stderr
    /// is inherited so diagnostics reach the daemon's own log.
    fn run_get_string(&mut self) -> Result<String>;

    /// Run the command, capturing both stdout (discarded) and stderr; on
    /// failure the captured stderr is folded into the error message.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Run the command and parse its stdout as JSON into `T`.
    fn run_and_parse_json<T: DeserializeOwned>(&mut self) -> Result<T>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("running: {}", format_for_log(self));
        self
    }

    fn run(&mut self) -> Result<()> {
        let desc = format_for_log(self);
        let status = self
            .status()
            .with_context(|| format!("Failed to spawn {desc}"))?;
        if !status.success() {
            return Err(anyhow!("Child {desc:?} exited with status {status}"));
        }
        Ok(())
    }

    fn run_get_string(&mut self) -> Result<String> {
        let desc = format_for_log(self);
        self.stdout(Stdio::piped());
        let output = self
            .output()
            .with_context(|| format!("Failed to spawn {desc}"))?;
        let output = require_success(self, output)?;
        String::from_utf8(output.stdout).context("Child output was not valid UTF-8")
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let desc = format_for_log(self);
        self.stdout(Stdio::null());
        self.stderr(Stdio::piped());
        let output = self
            .output()
            .with_context(|| format!("Failed to spawn {desc}"))?;
        require_success(self, output)?;
        Ok(())
    }

    fn run_and_parse_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let s = self.run_get_string()?;
        serde_json::from_str(&s).with_context(|| format!("Parsing JSON from {:?}", self.get_program()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_get_string() {
        let out = Command::new("echo").arg("hello").run_get_string().unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_failure() {
        let r = Command::new("false").run();
        assert!(r.is_err());
    }
}
