//! External command construction and execution.
//!
//! Build steps never spawn processes directly. They describe the command
//! with [`Cmd`] and hand it to a [`CommandRunner`], so that the exact command
//! line can be asserted in tests and failures can be injected.
//!
//! ```rust,ignore
//! use ubuntu_image::process::Cmd;
//!
//! Cmd::new("sfdisk")
//!     .arg_path(&disk)
//!     .stdin(script)
//!     .error_msg("sfdisk failed to write partition table")
//!     .run()?;
//! ```

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A command line plus the policy for interpreting its exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            stdin: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Bytes written to the child's stdin before waiting on it.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Message prefix used when the command exits non-zero.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Report a non-zero exit through [`CmdOutput::success`] instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &Path {
        Path::new(&self.program)
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn allows_failure(&self) -> bool {
        self.allow_fail
    }

    /// Run with the real process runner.
    pub fn run(&self) -> Result<CmdOutput> {
        SystemRunner.run(self)
    }

    pub fn run_with(&self, runner: &dyn CommandRunner) -> Result<CmdOutput> {
        runner.run(self)
    }

    /// Turn a finished process into `Ok` or the configured error.
    pub fn check(&self, output: CmdOutput) -> Result<CmdOutput> {
        if output.success() || self.allow_fail {
            return Ok(output);
        }
        let status = match output.code {
            Some(code) => format!("exit status {}", code),
            None => "termination by signal".to_string(),
        };
        let stderr = String::from_utf8_lossy(&output.stderr);
        let prefix = self
            .error_msg
            .clone()
            .unwrap_or_else(|| format!("command '{}' failed", self));
        bail!("{}: {} ({})", prefix, status, stderr.trim())
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Capability for executing external commands.
pub trait CommandRunner {
    /// Run `cmd` to completion. Implementations must honour
    /// [`Cmd::allows_failure`] through [`Cmd::check`].
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput>;
}

/// Runs commands on the host with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        debug!(command = %cmd, "running");

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }
        command
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to run {}", cmd.program.to_string_lossy()))?;

        if let (Some(input), Some(mut pipe)) = (&cmd.stdin, child.stdin.take()) {
            pipe.write_all(input)
                .with_context(|| format!("writing stdin of '{}'", cmd))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for '{}'", cmd))?;

        cmd.check(CmdOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
