//! Error types for nodeprep.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::subsystem::{Stage, SubsystemKind};

/// Filesystem operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    CreateDir,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoOp::Read => write!(f, "read"),
            IoOp::Write => write!(f, "write"),
            IoOp::CreateDir => write!(f, "create directory"),
        }
    }
}

#[derive(Error, Debug)]
pub enum NodePrepError {
    #[error("failed to {op} {}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {output}", exit_label(.status))]
    Execution {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("{subsystem} failed while {stage}")]
    Subsystem {
        subsystem: SubsystemKind,
        stage: Stage,
        #[source]
        source: Box<NodePrepError>,
    },
}

impl NodePrepError {
    pub(crate) fn io(op: IoOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NodePrepError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Subsystem that aborted the run, if any
    pub fn subsystem(&self) -> Option<SubsystemKind> {
        match self {
            NodePrepError::Subsystem { subsystem, .. } => Some(*subsystem),
            _ => None,
        }
    }

    /// Innermost error, with subsystem context stripped
    pub fn root_cause(&self) -> &NodePrepError {
        match self {
            NodePrepError::Subsystem { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "no status (killed by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, NodePrepError>;
