//! Host command execution.
//!
//! Every administrative action runs inside the host's mount namespace so that
//! systemctl talks to the real host rather than to the container nodeprep
//! itself runs in.
//!
//! Production code uses `NsenterRunner`. Tests use `RecordingRunner`, which
//! records what would have run and never spawns a process.

use std::fmt;
use std::process::Command;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{NodePrepError, Result};

/// One administrative command to run in the host context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedCommand {
    /// Absolute path of the binary on the host
    pub program: String,
    pub args: Vec<String>,
    /// Mount namespace the command is executed in
    pub mount_namespace: String,
}

impl PrivilegedCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I, mount_namespace: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            mount_namespace: mount_namespace.into(),
        }
    }
}

impl fmt::Display for PrivilegedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executes privileged commands against the host
pub trait HostCommandRunner: Send + Sync {
    /// Run `command` to completion and return its combined output.
    ///
    /// A non-zero exit must be reported as `NodePrepError::Execution`.
    fn run(&self, command: &PrivilegedCommand) -> Result<String>;
}

/// Runs commands through nsenter(1)
pub struct NsenterRunner {
    nsenter: String,
}

impl NsenterRunner {
    pub fn new(nsenter: impl Into<String>) -> Self {
        Self {
            nsenter: nsenter.into(),
        }
    }

    /// Argument vector passed to nsenter for `command`
    pub fn nsenter_args(command: &PrivilegedCommand) -> Vec<String> {
        let mut args = Vec::with_capacity(command.args.len() + 3);
        args.push(format!("-m{}", command.mount_namespace));
        args.push("--".to_string());
        args.push(command.program.clone());
        args.extend(command.args.iter().cloned());
        args
    }
}

impl HostCommandRunner for NsenterRunner {
    fn run(&self, command: &PrivilegedCommand) -> Result<String> {
        info!("Executing on host: {}", command);
        let output = Command::new(&self.nsenter)
            .args(Self::nsenter_args(command))
            .output()
            .map_err(|source| NodePrepError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(NodePrepError::Execution {
                command: command.to_string(),
                status: output.status.code(),
                output: combined.trim_end().to_string(),
            });
        }

        debug!("{} succeeded: {}", command, combined.trim_end());
        Ok(combined)
    }
}

/// Fake runner that records commands instead of executing them
#[derive(Default)]
pub struct RecordingRunner {
    executed: Mutex<Vec<PrivilegedCommand>>,
    fail_on: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose rendered form contains `needle`
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            fail_on: Some(needle.into()),
        }
    }

    /// Commands run so far, in order (failed attempts included)
    pub fn executed(&self) -> Vec<PrivilegedCommand> {
        match self.executed.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rendered command lines run so far
    pub fn command_lines(&self) -> Vec<String> {
        self.executed().iter().map(ToString::to_string).collect()
    }
}

impl HostCommandRunner for RecordingRunner {
    fn run(&self, command: &PrivilegedCommand) -> Result<String> {
        match self.executed.lock() {
            Ok(mut guard) => guard.push(command.clone()),
            Err(poisoned) => poisoned.into_inner().push(command.clone()),
        }

        let line = command.to_string();
        if let Some(needle) = &self.fail_on {
            if line.contains(needle.as_str()) {
                return Err(NodePrepError::Execution {
                    command: line,
                    status: Some(1),
                    output: "simulated failure".to_string(),
                });
            }
        }
        Ok(String::new())
    }
}
