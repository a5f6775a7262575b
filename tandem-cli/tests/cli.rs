use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn tandem_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tandem").expect("tandem binary");
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

struct Dirs {
    home: TempDir,
    local: TempDir,
    sandbox: TempDir,
}

fn registered(project: &str) -> Dirs {
    let dirs = Dirs {
        home: TempDir::new().expect("home"),
        local: TempDir::new().expect("local"),
        sandbox: TempDir::new().expect("sandbox"),
    };
    tandem_cmd(dirs.home.path())
        .arg("init")
        .arg(project)
        .arg("--local")
        .arg(dirs.local.path())
        .arg("--remote")
        .arg(dirs.sandbox.path())
        .assert()
        .success()
        .stdout(contains(format!("Registered '{project}'")));
    dirs
}

#[test]
fn init_writes_registry_and_list_shows_it() {
    let dirs = registered("web");
    assert!(dirs.home.path().join(".tandem/projects/web.yaml").exists());

    tandem_cmd(dirs.home.path())
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(contains("web").and(contains("both")));
}

#[test]
fn init_rejects_a_conflicting_registration() {
    let dirs = registered("web");
    let other = TempDir::new().unwrap();
    tandem_cmd(dirs.home.path())
        .arg("init")
        .arg("web")
        .arg("--local")
        .arg(other.path())
        .arg("--remote")
        .arg(dirs.sandbox.path())
        .assert()
        .failure()
        .stderr(contains("already registered"));
}

#[test]
fn diff_and_status_report_pending_files_before_first_sync() {
    let dirs = registered("web");
    fs::create_dir_all(dirs.local.path().join("src")).unwrap();
    fs::write(dirs.local.path().join("src/app.ts"), "v1").unwrap();
    fs::create_dir_all(dirs.local.path().join("node_modules/x")).unwrap();
    fs::write(dirs.local.path().join("node_modules/x/index.js"), "dep").unwrap();

    tandem_cmd(dirs.home.path())
        .args(["diff", "web"])
        .assert()
        .success()
        .stdout(contains("src/app.ts").and(contains("node_modules").not()));

    let output = tandem_cmd(dirs.home.path())
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["summary"]["projects"], 1);
    assert_eq!(status["summary"]["daemon_running"], false);
    assert_eq!(status["projects"][0]["status"], "never_synced");
    assert_eq!(status["projects"][0]["pending_changes"], 1);
}

#[test]
fn unknown_projects_get_an_init_hint() {
    let home = TempDir::new().unwrap();
    tandem_cmd(home.path())
        .args(["sync", "ghost"])
        .assert()
        .failure()
        .stderr(contains("tandem init ghost"));
}

#[test]
fn daemon_status_when_stopped() {
    let home = TempDir::new().unwrap();
    tandem_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
    tandem_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("not running"));
}

#[test]
fn sync_round_trip_then_reset_and_remove() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let dirs = registered("web");
    fs::write(dirs.local.path().join("index.ts"), "v1").unwrap();

    tandem_cmd(dirs.home.path())
        .args(["sync", "web"])
        .assert()
        .success()
        .stdout(contains("first sync").and(contains("index.ts")));
    assert_eq!(
        fs::read_to_string(dirs.sandbox.path().join("index.ts")).unwrap(),
        "v1"
    );

    fs::write(dirs.sandbox.path().join("notes.md"), "from the sandbox").unwrap();
    tandem_cmd(dirs.home.path())
        .args(["log", "web"])
        .assert()
        .success();
    tandem_cmd(dirs.home.path())
        .args(["sync", "web", "--direction", "down"])
        .assert()
        .success()
        .stdout(contains("notes.md"));
    assert_eq!(
        fs::read_to_string(dirs.local.path().join("notes.md")).unwrap(),
        "from the sandbox"
    );

    tandem_cmd(dirs.home.path())
        .args(["diff", "web"])
        .assert()
        .success()
        .stdout(contains("No pending local changes"));

    tandem_cmd(dirs.home.path())
        .args(["reset", "web"])
        .assert()
        .success()
        .stdout(contains("Baseline dropped"));
    tandem_cmd(dirs.home.path())
        .args(["reset", "web"])
        .assert()
        .success()
        .stdout(contains("no baseline"));

    tandem_cmd(dirs.home.path())
        .args(["project", "remove", "web"])
        .assert()
        .success()
        .stdout(contains("Removed 'web'"));
    assert!(!dirs.home.path().join(".tandem/projects/web.yaml").exists());
}
