//! nodeprep library - exposes modules for testing.
//!
//! Installs host config files for the container runtime, cgroup slices,
//! containerd and kubelet, and restarts only what changed.

pub mod actions;
pub mod config;
pub mod error;
pub mod host;
pub mod installer;
pub mod orchestrator;
pub mod sentinel;
pub mod subsystem;

pub use actions::{HostAction, Service};
pub use config::Config;
pub use error::{NodePrepError, Result};
pub use host::{HostCommandRunner, NsenterRunner, PrivilegedCommand, RecordingRunner};
pub use orchestrator::{Orchestrator, RunReport};
pub use subsystem::{ChangeSet, ConfigUnit, Stage, SubsystemKind, SubsystemReport, UnitId};
