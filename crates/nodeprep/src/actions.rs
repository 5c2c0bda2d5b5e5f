//! Host actions issued by cascades, and their expansion into commands.

use std::fmt;

use crate::config::Config;
use crate::host::PrivilegedCommand;

/// Service managed by nodeprep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    RuntimeDaemon,
    Shim,
    Kubelet,
}

impl Service {
    /// systemd unit name for this service
    pub fn unit_name<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            Service::RuntimeDaemon => &config.services.runtime_daemon,
            Service::Shim => &config.services.shim,
            Service::Kubelet => &config.services.kubelet,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::RuntimeDaemon => write!(f, "runtime-daemon"),
            Service::Shim => write!(f, "shim"),
            Service::Kubelet => write!(f, "kubelet"),
        }
    }
}

/// One step of a cascade
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    DaemonReload,
    Enable(Service),
    Restart(Service),
    Reboot,
    /// Fetch the pinned shim release and unpack it over the installed binaries
    UpdateRuntime { version: String },
}

impl HostAction {
    /// Commands that carry out this action, in order
    pub fn commands(&self, config: &Config) -> Vec<PrivilegedCommand> {
        let ns = config.host.mount_namespace.as_str();
        let systemctl = config.host.systemctl.as_str();
        match self {
            HostAction::DaemonReload => {
                vec![PrivilegedCommand::new(systemctl, ["daemon-reload"], ns)]
            }
            HostAction::Enable(service) => vec![PrivilegedCommand::new(
                systemctl,
                ["enable", service.unit_name(config)],
                ns,
            )],
            HostAction::Restart(service) => vec![PrivilegedCommand::new(
                systemctl,
                ["restart", service.unit_name(config)],
                ns,
            )],
            HostAction::Reboot => vec![PrivilegedCommand::new(systemctl, ["reboot"], ns)],
            HostAction::UpdateRuntime { version } => {
                let upgrade = &config.policy.runtime_upgrade;
                let download = upgrade.download_path_for(version);
                vec![
                    PrivilegedCommand::new(
                        config.host.curl.as_str(),
                        [
                            "-s".to_string(),
                            "-L".to_string(),
                            upgrade.url_for(version),
                            "-o".to_string(),
                            download.clone(),
                        ],
                        ns,
                    ),
                    PrivilegedCommand::new(
                        config.host.tar.as_str(),
                        [
                            "xvzf".to_string(),
                            download,
                            "-C".to_string(),
                            upgrade.extract_dir.clone(),
                        ],
                        ns,
                    ),
                ]
            }
        }
    }
}

impl fmt::Display for HostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAction::DaemonReload => write!(f, "daemon-reload"),
            HostAction::Enable(service) => write!(f, "enable {}", service),
            HostAction::Restart(service) => write!(f, "restart {}", service),
            HostAction::Reboot => write!(f, "reboot"),
            HostAction::UpdateRuntime { version } => write!(f, "update runtime to {}", version),
        }
    }
}
