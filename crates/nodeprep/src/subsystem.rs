//! Subsystem reconcilers.
//!
//! Each subsystem installs a fixed, ordered list of config units and then
//! applies its cascade rule to the resulting change flags:
//!
//! | Subsystem      | Trigger                              | Cascade                                        |
//! |----------------|--------------------------------------|------------------------------------------------|
//! | runtime-daemon | any unit                             | restart runtime daemon, restart kubelet        |
//! | cgroups        | kubelet or runtime daemon drop-in    | reload, restart runtime daemon, restart kubelet|
//! | shim           | any unit                             | enable, reload, restart shim, update runtime   |
//! | kubelet        | any unit                             | reload, restart kubelet, reboot                |
//!
//! The shim runtime update and the kubelet reboot are policy switches.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::actions::{HostAction, Service};
use crate::config::Config;
use crate::error::{NodePrepError, Result};
use crate::host::HostCommandRunner;
use crate::installer;

const SYSTEMD_DIR: &str = "etc/systemd/system";

/// Drop-in directory of a systemd service, relative to host_root
fn drop_in_dir(service: &str) -> String {
    format!("{}/{}.service.d", SYSTEMD_DIR, service)
}

/// Host component with its own config units and cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemKind {
    RuntimeDaemon,
    CgroupSlices,
    Shim,
    Kubelet,
}

impl SubsystemKind {
    /// Reconciliation order. cgroup slices must exist before the shim and
    /// kubelet drop-ins reference them, and the shim must be running before
    /// kubelet is reconfigured.
    pub const ORDER: [SubsystemKind; 4] = [
        SubsystemKind::RuntimeDaemon,
        SubsystemKind::CgroupSlices,
        SubsystemKind::Shim,
        SubsystemKind::Kubelet,
    ];

    /// Units installed by this subsystem, in install order
    pub fn units(&self) -> &'static [UnitId] {
        match self {
            SubsystemKind::RuntimeDaemon => &[UnitId::RuntimeDaemonConfig],
            SubsystemKind::CgroupSlices => &[
                UnitId::RuntimeSlice,
                UnitId::KubeletCgroupDropIn,
                UnitId::RuntimeDaemonCgroupDropIn,
                UnitId::ShimCgroupDropIn,
            ],
            SubsystemKind::Shim => &[
                UnitId::ShimCgroupDropIn,
                UnitId::ShimConfig,
                UnitId::ShimServiceUnit,
                UnitId::CniConfig,
            ],
            SubsystemKind::Kubelet => &[
                UnitId::KubeletServiceUnit,
                UnitId::KubeletDropIn,
                UnitId::KubeletFlags,
                UnitId::KubeletConfig,
            ],
        }
    }

    /// Host directories created before installing, relative to host_root
    pub fn directories(&self, config: &Config) -> Vec<String> {
        let services = &config.services;
        match self {
            SubsystemKind::RuntimeDaemon => vec!["etc/docker".to_string()],
            SubsystemKind::CgroupSlices => vec![
                SYSTEMD_DIR.to_string(),
                drop_in_dir(&services.kubelet),
                drop_in_dir(&services.runtime_daemon),
                drop_in_dir(&services.shim),
            ],
            SubsystemKind::Shim => vec![
                "etc/containerd".to_string(),
                drop_in_dir(&services.shim),
                "etc/cni/net.d".to_string(),
            ],
            SubsystemKind::Kubelet => vec![
                drop_in_dir(&services.kubelet),
                "var/lib/kubelet".to_string(),
            ],
        }
    }

    /// Cascade rule: actions to run given this subsystem's change flags
    pub fn cascade(&self, changes: &ChangeSet, config: &Config) -> Vec<HostAction> {
        match self {
            SubsystemKind::RuntimeDaemon => {
                if !changes.any() {
                    return Vec::new();
                }
                vec![
                    HostAction::Restart(Service::RuntimeDaemon),
                    HostAction::Restart(Service::Kubelet),
                ]
            }
            SubsystemKind::CgroupSlices => {
                // A slice-only change takes effect on the next service restart
                if !(changes.changed(UnitId::KubeletCgroupDropIn)
                    || changes.changed(UnitId::RuntimeDaemonCgroupDropIn))
                {
                    return Vec::new();
                }
                vec![
                    HostAction::DaemonReload,
                    HostAction::Restart(Service::RuntimeDaemon),
                    HostAction::Restart(Service::Kubelet),
                ]
            }
            SubsystemKind::Shim => {
                if !changes.any() {
                    return Vec::new();
                }
                let mut actions = vec![
                    HostAction::Enable(Service::Shim),
                    HostAction::DaemonReload,
                    HostAction::Restart(Service::Shim),
                ];
                let upgrade = &config.policy.runtime_upgrade;
                if upgrade.enabled {
                    actions.push(HostAction::UpdateRuntime {
                        version: upgrade.version.clone(),
                    });
                }
                actions
            }
            SubsystemKind::Kubelet => {
                if !changes.any() {
                    return Vec::new();
                }
                let mut actions = vec![
                    HostAction::DaemonReload,
                    HostAction::Restart(Service::Kubelet),
                ];
                if config.policy.reboot_on_kubelet_change {
                    actions.push(HostAction::Reboot);
                }
                actions
            }
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubsystemKind::RuntimeDaemon => write!(f, "runtime-daemon"),
            SubsystemKind::CgroupSlices => write!(f, "cgroup-slices"),
            SubsystemKind::Shim => write!(f, "container-runtime-shim"),
            SubsystemKind::Kubelet => write!(f, "kubelet"),
        }
    }
}

/// Identity of one desired/installed file pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    RuntimeDaemonConfig,
    RuntimeSlice,
    KubeletCgroupDropIn,
    RuntimeDaemonCgroupDropIn,
    ShimCgroupDropIn,
    ShimConfig,
    ShimServiceUnit,
    CniConfig,
    KubeletServiceUnit,
    KubeletDropIn,
    KubeletFlags,
    KubeletConfig,
}

impl UnitId {
    /// File name under the source directory
    pub fn source_name(&self) -> &'static str {
        match self {
            UnitId::RuntimeDaemonConfig => "daemon.json",
            UnitId::RuntimeSlice => "runtime.slice",
            UnitId::KubeletCgroupDropIn => "kubelet-10-cgroup.conf",
            UnitId::RuntimeDaemonCgroupDropIn => "docker-10-cgroup.conf",
            UnitId::ShimCgroupDropIn => "containerd-10-cgroup.conf",
            UnitId::ShimConfig => "config.toml",
            UnitId::ShimServiceUnit => "containerd.service",
            UnitId::CniConfig => "kubenet.conf",
            UnitId::KubeletServiceUnit => "kubelet.service",
            UnitId::KubeletDropIn => "10-kubeadm.conf",
            UnitId::KubeletFlags => "flags.env",
            UnitId::KubeletConfig => "config.yaml",
        }
    }

    /// Installed location, relative to host_root
    ///
    /// Unit files and drop-ins follow the configured service names.
    pub fn dest_path(&self, config: &Config) -> String {
        let services = &config.services;
        match self {
            UnitId::RuntimeDaemonConfig => "etc/docker/daemon.json".to_string(),
            UnitId::RuntimeSlice => format!("{}/runtime.slice", SYSTEMD_DIR),
            UnitId::KubeletCgroupDropIn => {
                format!("{}/10-cgroup.conf", drop_in_dir(&services.kubelet))
            }
            UnitId::RuntimeDaemonCgroupDropIn => {
                format!("{}/10-cgroup.conf", drop_in_dir(&services.runtime_daemon))
            }
            UnitId::ShimCgroupDropIn => format!("{}/10-cgroup.conf", drop_in_dir(&services.shim)),
            UnitId::ShimConfig => "etc/containerd/config.toml".to_string(),
            UnitId::ShimServiceUnit => format!("{}/{}.service", SYSTEMD_DIR, services.shim),
            UnitId::CniConfig => "etc/containerd/kubenet.conf".to_string(),
            UnitId::KubeletServiceUnit => format!("{}/{}.service", SYSTEMD_DIR, services.kubelet),
            UnitId::KubeletDropIn => format!("{}/10-kubeadm.conf", drop_in_dir(&services.kubelet)),
            UnitId::KubeletFlags => "var/lib/kubelet/flags.env".to_string(),
            UnitId::KubeletConfig => "var/lib/kubelet/config.yaml".to_string(),
        }
    }

    pub fn resolve(&self, config: &Config) -> ConfigUnit {
        ConfigUnit {
            id: *self,
            source: config.source_path(self.source_name()),
            dest: config.host_path(&self.dest_path(config)),
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_name())
    }
}

/// Desired file and the live host file a service reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUnit {
    pub id: UnitId,
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Change flags of one subsystem run, in install order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    flags: Vec<(UnitId, bool)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: UnitId, changed: bool) {
        self.flags.push((id, changed));
    }

    pub fn changed(&self, id: UnitId) -> bool {
        self.flags.iter().any(|(u, c)| *u == id && *c)
    }

    pub fn any(&self) -> bool {
        self.flags.iter().any(|(_, c)| *c)
    }

    /// Units that changed, in install order
    pub fn changed_units(&self) -> Vec<UnitId> {
        self.flags
            .iter()
            .filter(|(_, c)| *c)
            .map(|(u, _)| *u)
            .collect()
    }
}

impl FromIterator<(UnitId, bool)> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = (UnitId, bool)>>(iter: T) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

/// Step a subsystem was in when it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Preparing(PathBuf),
    Installing(UnitId),
    Cascading(HostAction),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preparing(dir) => write!(f, "preparing {}", dir.display()),
            Stage::Installing(unit) => write!(f, "installing {}", unit),
            Stage::Cascading(action) => write!(f, "running {}", action),
        }
    }
}

/// Outcome of one subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemReport {
    pub subsystem: SubsystemKind,
    pub changes: ChangeSet,
    /// Actions issued (or, for a preview, that would be issued)
    pub actions: Vec<HostAction>,
}

fn fail(kind: SubsystemKind, stage: Stage, source: NodePrepError) -> NodePrepError {
    NodePrepError::Subsystem {
        subsystem: kind,
        stage,
        source: Box::new(source),
    }
}

/// Install the subsystem's units and run its cascade.
///
/// Stops at the first error; nothing already written or restarted is undone.
pub fn reconcile(
    kind: SubsystemKind,
    config: &Config,
    runner: &dyn HostCommandRunner,
) -> Result<SubsystemReport> {
    info!("Configuring {}", kind);

    for dir in kind.directories(config) {
        let dir = config.host_path(&dir);
        installer::ensure_dir(&dir).map_err(|e| fail(kind, Stage::Preparing(dir.clone()), e))?;
    }

    let mut changes = ChangeSet::new();
    for id in kind.units() {
        let unit = id.resolve(config);
        let changed = installer::install_if_changed(&unit.source, &unit.dest)
            .map_err(|e| fail(kind, Stage::Installing(*id), e))?;
        changes.record(*id, changed);
    }

    let actions = kind.cascade(&changes, config);
    debug!(
        "{}: changed={:?}, {} cascade action(s)",
        kind,
        changes.changed_units(),
        actions.len()
    );

    for action in &actions {
        info!("{}: {}", kind, action);
        for command in action.commands(config) {
            runner
                .run(&command)
                .map_err(|e| fail(kind, Stage::Cascading(action.clone()), e))?;
        }
    }

    Ok(SubsystemReport {
        subsystem: kind,
        changes,
        actions,
    })
}

/// Compute what `reconcile` would do without writing files or running commands.
///
/// `installed` holds units an earlier subsystem in the same run would already
/// have written; they count as unchanged here, as they would in a real run.
/// Units evaluated by this subsystem are added to it.
pub fn preview(
    kind: SubsystemKind,
    config: &Config,
    installed: &mut HashSet<UnitId>,
) -> Result<SubsystemReport> {
    let mut changes = ChangeSet::new();
    for id in kind.units() {
        let changed = if installed.contains(id) {
            false
        } else {
            let unit = id.resolve(config);
            installer::would_change(&unit.source, &unit.dest)
                .map_err(|e| fail(kind, Stage::Installing(*id), e))?
        };
        installed.insert(*id);
        changes.record(*id, changed);
    }
    let actions = kind.cascade(&changes, config);
    Ok(SubsystemReport {
        subsystem: kind,
        changes,
        actions,
    })
}
