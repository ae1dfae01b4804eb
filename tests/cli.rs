use assert_cmd::Command;
use predicates::prelude::*;

fn fleetingd() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("fleetingd").unwrap()
}

#[test]
fn help_exits_successfully() {
    fleetingd().arg("--help").assert().success();
}

#[test]
fn version_exits_successfully() {
    fleetingd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetingd"));
}

#[test]
fn no_args_shows_usage() {
    fleetingd().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn unknown_subcommand_fails() {
    fleetingd()
        .arg("nonexistent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn help_lists_all_subcommands() {
    let assert = fleetingd().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for cmd in ["serve", "check-config", "completions"] {
        assert!(output.contains(cmd), "help output should list '{cmd}' subcommand");
    }
}

#[test]
fn check_config_rejects_missing_file() {
    fleetingd()
        .arg("check-config")
        .arg("/nonexistent/fleetingd.toml")
        .assert()
        .failure();
}

#[test]
fn check_config_accepts_well_formed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetingd.toml");
    std::fs::write(
        &path,
        r#"
        egress_interface = "eth0"
        vm_disk_directory = "/tmp/fleetingd-test"
        vm_subnet = "10.0.0."
        vm_num_cpu_cores = 2
        vm_memory_mb = 512
        vm_disk_size_gb = 4
        "#,
    )
    .unwrap();

    fleetingd()
        .arg("check-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok"));
}

#[test]
fn completions_for_bash_mentions_binary_name() {
    fleetingd()
        .arg("completions")
        .arg("bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetingd"));
}
