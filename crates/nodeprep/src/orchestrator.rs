//! Runs the subsystems in dependency order, stopping at the first failure.

use std::collections::HashSet;

use tracing::info;

use crate::actions::HostAction;
use crate::config::Config;
use crate::error::Result;
use crate::host::HostCommandRunner;
use crate::subsystem::{self, SubsystemKind, SubsystemReport, UnitId};

/// Result of a full run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub subsystems: Vec<SubsystemReport>,
}

impl RunReport {
    /// Every action issued, in order
    pub fn actions(&self) -> Vec<HostAction> {
        self.subsystems
            .iter()
            .flat_map(|s| s.actions.iter().cloned())
            .collect()
    }

    /// Units rewritten, in order
    pub fn changed_units(&self) -> Vec<UnitId> {
        self.subsystems
            .iter()
            .flat_map(|s| s.changes.changed_units())
            .collect()
    }

    /// True when nothing was written and nothing was run
    pub fn is_noop(&self) -> bool {
        self.subsystems
            .iter()
            .all(|s| !s.changes.any() && s.actions.is_empty())
    }
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    runner: &'a dyn HostCommandRunner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn HostCommandRunner) -> Self {
        Self { config, runner }
    }

    /// Reconcile every subsystem in SubsystemKind::ORDER.
    ///
    /// The first error aborts the run; later subsystems are not entered and
    /// earlier ones are not rolled back.
    pub fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        for kind in SubsystemKind::ORDER {
            report
                .subsystems
                .push(subsystem::reconcile(kind, self.config, self.runner)?);
        }
        info!(
            "Reconciliation finished: {} unit(s) updated, {} action(s) issued",
            report.changed_units().len(),
            report.actions().len()
        );
        Ok(report)
    }
}

/// Report what `Orchestrator::run` would change, without touching the host
pub fn preview(config: &Config) -> Result<RunReport> {
    let mut installed = HashSet::new();
    let mut report = RunReport::default();
    for kind in SubsystemKind::ORDER {
        report
            .subsystems
            .push(subsystem::preview(kind, config, &mut installed)?);
    }
    Ok(report)
}
