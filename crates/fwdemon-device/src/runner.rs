//! External tool invocation
//!
//! Every interaction with the outside world (session helper scripts, `screen`,
//! `git`, the build toolchain) goes through a [`ToolRunner`]. Each call runs a
//! child process to completion before returning; nothing is pipelined.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use fwdemon_core::prelude::*;

/// A structured description of one child-process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child; the parent's directory is never changed
    pub current_dir: Option<PathBuf>,
    /// Environment overrides added on top of the inherited environment
    pub env: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as shown in error reports
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg.trim_end_matches(['\r', '\n']));
        }
        line
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the child was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut text = self.stdout.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.stderr);
                text
            }
        }
    }
}

/// Runs external tools to completion
#[trait_variant::make(ToolRunner: Send)]
pub trait LocalToolRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Runs tools as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        debug!("Running: {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound {
                    program: invocation.program.clone(),
                }
            } else {
                Error::process(format!("Failed to run '{}': {}", invocation, e))
            }
        })?;

        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        trace!("{} exited with {:?}", invocation.program, result.code);
        Ok(result)
    }
}
