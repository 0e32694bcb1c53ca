//! Collaborator process execution.
//!
//! All external tools (apt-get, psql, systemctl, a2enmod, ...) are invoked
//! through the [`CommandRunner`] trait so the whole workflow can run against
//! a scripted runner in tests. The production implementation is a thin
//! wrapper over `std::process::Command`.

use std::io;
use std::process::Command;

use crate::error::ProvisionError;

/// Captured result of one collaborator invocation.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn ok(stdout: &str) -> Self {
        Self {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: &str) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Abstraction over external tool invocation.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, capturing output. An `Err` means the
    /// process could not be spawned at all; a non-zero exit is reported
    /// through [`CmdOutput::status`].
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput>;

    /// Same as [`CommandRunner::run`] with extra environment variables.
    fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> io::Result<CmdOutput> {
        let _ = env;
        self.run(program, args)
    }
}

/// Production runner backed by `std::process::Command`.
pub struct SystemRunner;

impl SystemRunner {
    fn capture(mut cmd: Command) -> io::Result<CmdOutput> {
        let output = cmd.output()?;
        Ok(CmdOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        Self::capture(cmd)
    }

    fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> io::Result<CmdOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        Self::capture(cmd)
    }
}

/// Run a collaborator and convert spawn failures and non-zero exits into
/// [`ProvisionError::Collaborator`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<CmdOutput, ProvisionError> {
    let output = runner
        .run(program, args)
        .map_err(|e| ProvisionError::Collaborator {
            tool: program.to_string(),
            status: -1,
            stderr: e.to_string(),
        })?;
    if !output.success() {
        return Err(ProvisionError::Collaborator {
            tool: program.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}
