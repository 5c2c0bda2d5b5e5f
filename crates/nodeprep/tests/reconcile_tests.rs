//! End-to-end reconciliation tests against a temporary host root.
//!
//! RecordingRunner stands in for nsenter, so no host command is executed.

use nodeprep::{
    orchestrator, subsystem, Config, HostAction, NodePrepError, Orchestrator, RecordingRunner,
    Service, Stage, SubsystemKind, UnitId,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ALL_UNITS: [UnitId; 12] = [
    UnitId::RuntimeDaemonConfig,
    UnitId::RuntimeSlice,
    UnitId::KubeletCgroupDropIn,
    UnitId::RuntimeDaemonCgroupDropIn,
    UnitId::ShimCgroupDropIn,
    UnitId::ShimConfig,
    UnitId::ShimServiceUnit,
    UnitId::CniConfig,
    UnitId::KubeletServiceUnit,
    UnitId::KubeletDropIn,
    UnitId::KubeletFlags,
    UnitId::KubeletConfig,
];

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.source_dir = dir.path().join("configs");
    config.paths.host_root = dir.path().join("host");
    fs::create_dir_all(&config.paths.source_dir).unwrap();
    fs::create_dir_all(&config.paths.host_root).unwrap();
    config
}

fn write_desired(config: &Config, unit: UnitId, content: &str) {
    fs::write(config.source_path(unit.source_name()), content).unwrap();
}

fn write_installed(config: &Config, unit: UnitId, content: &str) {
    let dest = config.host_path(&unit.dest_path(config));
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::write(dest, content).unwrap();
}

fn installed(config: &Config, unit: UnitId) -> Option<String> {
    fs::read_to_string(config.host_path(&unit.dest_path(config))).ok()
}

fn desire_everything(config: &Config) {
    for unit in ALL_UNITS {
        write_desired(config, unit, &format!("# desired {}\n", unit));
    }
}

fn full_cascade() -> Vec<HostAction> {
    vec![
        // runtime daemon
        HostAction::Restart(Service::RuntimeDaemon),
        HostAction::Restart(Service::Kubelet),
        // cgroup slices
        HostAction::DaemonReload,
        HostAction::Restart(Service::RuntimeDaemon),
        HostAction::Restart(Service::Kubelet),
        // shim
        HostAction::Enable(Service::Shim),
        HostAction::DaemonReload,
        HostAction::Restart(Service::Shim),
        HostAction::UpdateRuntime {
            version: "1.3.0".to_string(),
        },
        // kubelet
        HostAction::DaemonReload,
        HostAction::Restart(Service::Kubelet),
        HostAction::Reboot,
    ]
}

#[test]
fn test_full_run_issues_cascades_in_order() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    desire_everything(&config);
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&config, &runner).run().unwrap();

    assert_eq!(report.actions(), full_cascade());
    assert_eq!(
        runner.command_lines(),
        vec![
            "/bin/systemctl restart docker",
            "/bin/systemctl restart kubelet",
            "/bin/systemctl daemon-reload",
            "/bin/systemctl restart docker",
            "/bin/systemctl restart kubelet",
            "/bin/systemctl enable containerd",
            "/bin/systemctl daemon-reload",
            "/bin/systemctl restart containerd",
            "/usr/bin/curl -s -L https://github.com/containerd/containerd/releases/download/v1.3.0/containerd-1.3.0.linux-amd64.tar.gz -o /tmp/containerd-1.3.0.linux-amd64.tar.gz",
            "/bin/tar xvzf /tmp/containerd-1.3.0.linux-amd64.tar.gz -C /usr",
            "/bin/systemctl daemon-reload",
            "/bin/systemctl restart kubelet",
            "/bin/systemctl reboot",
        ]
    );
    for unit in ALL_UNITS {
        assert_eq!(
            installed(&config, unit).as_deref(),
            Some(format!("# desired {}\n", unit).as_str())
        );
    }
    for cmd in runner.executed() {
        assert_eq!(cmd.mount_namespace, "/proc/1/ns/mnt");
    }
}

#[test]
fn test_second_run_is_noop() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    desire_everything(&config);

    let first = RecordingRunner::new();
    Orchestrator::new(&config, &first).run().unwrap();

    let second = RecordingRunner::new();
    let report = Orchestrator::new(&config, &second).run().unwrap();

    assert!(report.is_noop());
    assert!(report.changed_units().is_empty());
    assert!(second.executed().is_empty());
}

#[test]
fn test_daemon_config_change_restarts_runtime_and_kubelet() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_desired(&config, UnitId::RuntimeDaemonConfig, r#"{"log-level":"info"}"#);
    write_installed(&config, UnitId::RuntimeDaemonConfig, r#"{"log-level":"debug"}"#);
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&config, &runner).run().unwrap();

    assert_eq!(report.changed_units(), vec![UnitId::RuntimeDaemonConfig]);
    assert_eq!(
        report.actions(),
        vec![
            HostAction::Restart(Service::RuntimeDaemon),
            HostAction::Restart(Service::Kubelet),
        ]
    );
    assert_eq!(
        installed(&config, UnitId::RuntimeDaemonConfig).as_deref(),
        Some(r#"{"log-level":"info"}"#)
    );
}

#[test]
fn test_unchanged_kubelet_units_issue_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    for unit in SubsystemKind::Kubelet.units() {
        write_desired(&config, *unit, "KUBELET_ARGS=--v=2\n");
        write_installed(&config, *unit, "KUBELET_ARGS=--v=2\n");
    }
    let runner = RecordingRunner::new();

    let report = subsystem::reconcile(SubsystemKind::Kubelet, &config, &runner).unwrap();

    assert!(!report.changes.changed(UnitId::KubeletFlags));
    assert!(!report.changes.any());
    assert!(report.actions.is_empty());
    assert!(runner.executed().is_empty());
}

#[test]
fn test_missing_sources_leave_destinations_alone() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_desired(&config, UnitId::RuntimeDaemonConfig, "{}");
    write_installed(&config, UnitId::KubeletConfig, "hand edited\n");
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&config, &runner).run().unwrap();

    assert_eq!(report.changed_units(), vec![UnitId::RuntimeDaemonConfig]);
    assert_eq!(
        installed(&config, UnitId::KubeletConfig).as_deref(),
        Some("hand edited\n")
    );
    assert_eq!(installed(&config, UnitId::ShimConfig), None);
    assert_eq!(runner.executed().len(), 2);
}

#[test]
fn test_directories_are_prepared_even_without_sources() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&config, &runner).run().unwrap();

    assert!(report.is_noop());
    assert!(config.host_path("etc/cni/net.d").is_dir());
    assert!(config.host_path("etc/systemd/system/kubelet.service.d").is_dir());
    assert!(config.host_path("var/lib/kubelet").is_dir());
}

#[test]
fn test_cgroup_failure_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    desire_everything(&config);
    // The first daemon-reload belongs to the cgroup cascade
    let runner = RecordingRunner::failing_on("daemon-reload");

    let err = Orchestrator::new(&config, &runner).run().unwrap_err();

    assert_eq!(err.subsystem(), Some(SubsystemKind::CgroupSlices));
    match &err {
        NodePrepError::Subsystem { stage, .. } => {
            assert_eq!(*stage, Stage::Cascading(HostAction::DaemonReload))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.root_cause(), NodePrepError::Execution { .. }));
    assert_eq!(
        runner.command_lines(),
        vec![
            "/bin/systemctl restart docker",
            "/bin/systemctl restart kubelet",
            "/bin/systemctl daemon-reload",
        ]
    );
    // Shim and kubelet were never entered
    assert_eq!(installed(&config, UnitId::ShimConfig), None);
    assert_eq!(installed(&config, UnitId::KubeletFlags), None);
    assert!(!config.host_path("etc/cni/net.d").exists());
    // Work done before the failure stays in place
    assert!(installed(&config, UnitId::RuntimeDaemonConfig).is_some());
}

#[test]
fn test_unreadable_source_is_io_error() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // A directory exists but cannot be read as a file
    fs::create_dir(config.source_path(UnitId::RuntimeDaemonConfig.source_name())).unwrap();
    let runner = RecordingRunner::new();

    let err = Orchestrator::new(&config, &runner).run().unwrap_err();

    assert_eq!(err.subsystem(), Some(SubsystemKind::RuntimeDaemon));
    assert!(err.to_string().contains("installing daemon.json"));
    assert!(matches!(err.root_cause(), NodePrepError::Io { .. }));
    assert!(runner.executed().is_empty());
}

#[test]
fn test_reboot_failure_is_reported_after_files_are_installed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_desired(&config, UnitId::KubeletFlags, "KUBELET_ARGS=--v=4\n");
    let runner = RecordingRunner::failing_on("reboot");

    let err = Orchestrator::new(&config, &runner).run().unwrap_err();

    assert_eq!(err.subsystem(), Some(SubsystemKind::Kubelet));
    assert!(err.to_string().contains("running reboot"));
    assert_eq!(
        installed(&config, UnitId::KubeletFlags).as_deref(),
        Some("KUBELET_ARGS=--v=4\n")
    );
}

#[test]
fn test_policy_without_reboot_or_runtime_update() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.policy.reboot_on_kubelet_change = false;
    config.policy.runtime_upgrade.enabled = false;
    desire_everything(&config);
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&config, &runner).run().unwrap();

    let actions = report.actions();
    assert!(!actions.contains(&HostAction::Reboot));
    assert!(!actions
        .iter()
        .any(|a| matches!(a, HostAction::UpdateRuntime { .. })));
    assert_eq!(actions.last(), Some(&HostAction::Restart(Service::Kubelet)));
}

#[test]
fn test_preview_reports_without_writing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_desired(&config, UnitId::ShimConfig, "version = 2\n");

    let report = orchestrator::preview(&config).unwrap();

    assert_eq!(report.changed_units(), vec![UnitId::ShimConfig]);
    assert_eq!(report.actions().len(), 4);
    assert_eq!(installed(&config, UnitId::ShimConfig), None);
    assert!(!Path::new(&config.host_path("etc/containerd")).exists());
}

#[test]
fn test_preview_matches_run_for_shared_drop_in() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // Installed by the cgroup subsystem, listed again by the shim subsystem
    write_desired(&config, UnitId::ShimCgroupDropIn, "[Service]\nSlice=runtime.slice\n");

    let predicted = orchestrator::preview(&config).unwrap();
    let runner = RecordingRunner::new();
    let report = Orchestrator::new(&config, &runner).run().unwrap();

    assert_eq!(predicted.changed_units(), vec![UnitId::ShimCgroupDropIn]);
    assert_eq!(predicted.changed_units(), report.changed_units());
    assert_eq!(predicted.actions(), report.actions());
    assert!(report.actions().is_empty());
}

#[test]
fn test_preview_matches_run_when_everything_changes() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    desire_everything(&config);

    let predicted = orchestrator::preview(&config).unwrap();
    let runner = RecordingRunner::new();
    let report = Orchestrator::new(&config, &runner).run().unwrap();

    assert_eq!(predicted.changed_units(), report.changed_units());
    assert_eq!(predicted.actions(), full_cascade());
}

#[test]
fn test_renamed_runtime_daemon_gets_its_own_drop_in() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.services.runtime_daemon = "crio".to_string();
    write_desired(&config, UnitId::RuntimeDaemonCgroupDropIn, "[Service]\nSlice=runtime.slice\n");
    let runner = RecordingRunner::new();

    Orchestrator::new(&config, &runner).run().unwrap();

    let drop_in = config.host_path("etc/systemd/system/crio.service.d/10-cgroup.conf");
    assert_eq!(
        fs::read_to_string(drop_in).unwrap(),
        "[Service]\nSlice=runtime.slice\n"
    );
    assert!(!config.host_path("etc/systemd/system/docker.service.d").exists());
    assert_eq!(
        runner.command_lines(),
        vec![
            "/bin/systemctl daemon-reload",
            "/bin/systemctl restart crio",
            "/bin/systemctl restart kubelet",
        ]
    );
}
