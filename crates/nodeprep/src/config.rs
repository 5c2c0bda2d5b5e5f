//! Configuration for nodeprep.
//!
//! Loads settings from /etc/nodeprep/config.toml or uses defaults.
//! Every field has a default, so an empty file is a valid config.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{NodePrepError, Result};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/nodeprep/config.toml";

/// Where desired files live and where the host filesystem is mounted
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the desired configuration files
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Root every destination path is resolved under
    #[serde(default = "default_host_root")]
    pub host_root: PathBuf,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("/configs")
}

fn default_host_root() -> PathBuf {
    PathBuf::from("/")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            host_root: default_host_root(),
        }
    }
}

/// Binaries used to act on the host
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_nsenter")]
    pub nsenter: String,

    /// Mount namespace entered before running any command
    #[serde(default = "default_mount_namespace")]
    pub mount_namespace: String,

    #[serde(default = "default_systemctl")]
    pub systemctl: String,

    #[serde(default = "default_curl")]
    pub curl: String,

    #[serde(default = "default_tar")]
    pub tar: String,
}

fn default_nsenter() -> String {
    "/usr/bin/nsenter".to_string()
}

fn default_mount_namespace() -> String {
    "/proc/1/ns/mnt".to_string()
}

fn default_systemctl() -> String {
    "/bin/systemctl".to_string()
}

fn default_curl() -> String {
    "/usr/bin/curl".to_string()
}

fn default_tar() -> String {
    "/bin/tar".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            nsenter: default_nsenter(),
            mount_namespace: default_mount_namespace(),
            systemctl: default_systemctl(),
            curl: default_curl(),
            tar: default_tar(),
        }
    }
}

/// systemd unit names of the managed services
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_runtime_daemon")]
    pub runtime_daemon: String,

    #[serde(default = "default_shim")]
    pub shim: String,

    #[serde(default = "default_kubelet")]
    pub kubelet: String,
}

fn default_runtime_daemon() -> String {
    "docker".to_string()
}

fn default_shim() -> String {
    "containerd".to_string()
}

fn default_kubelet() -> String {
    "kubelet".to_string()
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            runtime_daemon: default_runtime_daemon(),
            shim: default_shim(),
            kubelet: default_kubelet(),
        }
    }
}

/// Pinned shim release fetched after the shim is reconfigured
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeUpgradeConfig {
    #[serde(default = "default_upgrade_enabled")]
    pub enabled: bool,

    #[serde(default = "default_upgrade_version")]
    pub version: String,

    /// Release URL; `{version}` is substituted
    #[serde(default = "default_upgrade_url")]
    pub url: String,

    /// Download location on the host; `{version}` is substituted
    #[serde(default = "default_upgrade_download_path")]
    pub download_path: String,

    /// Directory the tarball is extracted into
    #[serde(default = "default_upgrade_extract_dir")]
    pub extract_dir: String,
}

fn default_upgrade_enabled() -> bool {
    true
}

fn default_upgrade_version() -> String {
    "1.3.0".to_string()
}

fn default_upgrade_url() -> String {
    "https://github.com/containerd/containerd/releases/download/v{version}/containerd-{version}.linux-amd64.tar.gz"
        .to_string()
}

fn default_upgrade_download_path() -> String {
    "/tmp/containerd-{version}.linux-amd64.tar.gz".to_string()
}

fn default_upgrade_extract_dir() -> String {
    "/usr".to_string()
}

impl Default for RuntimeUpgradeConfig {
    fn default() -> Self {
        Self {
            enabled: default_upgrade_enabled(),
            version: default_upgrade_version(),
            url: default_upgrade_url(),
            download_path: default_upgrade_download_path(),
            extract_dir: default_upgrade_extract_dir(),
        }
    }
}

impl RuntimeUpgradeConfig {
    pub fn url_for(&self, version: &str) -> String {
        self.url.replace("{version}", version)
    }

    pub fn download_path_for(&self, version: &str) -> String {
        self.download_path.replace("{version}", version)
    }
}

/// Cascade policy knobs
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Reboot the host after a kubelet config change instead of only restarting kubelet
    #[serde(default = "default_reboot_on_kubelet_change")]
    pub reboot_on_kubelet_change: bool,

    #[serde(default)]
    pub runtime_upgrade: RuntimeUpgradeConfig,
}

fn default_reboot_on_kubelet_change() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reboot_on_kubelet_change: default_reboot_on_kubelet_change(),
            runtime_upgrade: RuntimeUpgradeConfig::default(),
        }
    }
}

/// Full nodeprep configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Config {
    /// Load config from an explicit path, or from CONFIG_PATH if it exists
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => {
                let default_path = Path::new(CONFIG_PATH);
                if default_path.exists() {
                    Self::load_from_path(default_path)
                } else {
                    debug!("{} not present, using defaults", CONFIG_PATH);
                    Ok(Config::default())
                }
            }
        }
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| NodePrepError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| NodePrepError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve a desired file name against the source directory
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.paths.source_dir.join(name)
    }

    /// Resolve a host-relative path under host_root
    pub fn host_path(&self, relative: &str) -> PathBuf {
        self.paths.host_root.join(relative.trim_start_matches('/'))
    }
}
