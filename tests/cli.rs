//! End-to-end tests for the `harbor` binary.
//!
//! Every test runs against its own `HARBOR_HOME`. Output is piped, so the
//! binary answers in JSON.

use assert_cmd::Command;
use harbor::model::{Port, Session};
use harbor::storage::SqliteStorage;
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn harbor(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("harbor").expect("Failed to find harbor binary");
    cmd.env("HARBOR_HOME", home)
        .env("HARBOR_ACTOR", "tester")
        .env_remove("HARBOR_DB")
        .env_remove("RUST_LOG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is JSON")
}

fn db_path(home: &Path) -> PathBuf {
    home.join("data").join("harbor.db")
}

/// Initialized home with one environment registered.
fn machine(name: &str, workspace: &str) -> TempDir {
    let home = TempDir::new().unwrap();
    harbor(home.path()).arg("init").assert().success();
    harbor(home.path())
        .args(["env", "register", name, "--bind"])
        .arg(format!("workspace={workspace}"))
        .assert()
        .success();
    home
}

// ============================================================================
// init / version
// ============================================================================

#[test]
fn test_version_json() {
    let home = TempDir::new().unwrap();
    let out = json_stdout(harbor(home.path()).args(["version", "--json"]));
    assert_eq!(out["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_init_is_repeatable() {
    let home = TempDir::new().unwrap();
    let first = json_stdout(harbor(home.path()).arg("init"));
    assert_eq!(first["created"], true);
    assert!(db_path(home.path()).exists());

    let second = json_stdout(harbor(home.path()).arg("init"));
    assert_eq!(second["created"], false);
}

// ============================================================================
// env
// ============================================================================

#[test]
fn test_first_registered_environment_is_current() {
    let home = machine("home-mac", "/Users/test/playground");
    harbor(home.path())
        .args(["env", "register", "office", "--bind", "workspace=/home/dev/work"])
        .assert()
        .success();

    let current = json_stdout(harbor(home.path()).args(["env", "current"]));
    assert_eq!(current["name"], "home-mac");
    assert_eq!(current["bindings"]["workspace"], "/Users/test/playground");

    let list = json_stdout(harbor(home.path()).args(["env", "list"]));
    let currents = list
        .as_array()
        .unwrap()
        .iter()
        .filter(|env| env["is_current"] == true)
        .count();
    assert_eq!(currents, 1);
}

#[test]
fn test_validation_errors_exit_4() {
    let home = machine("home-mac", "/Users/test/playground");

    harbor(home.path())
        .args(["env", "register", "home-mac"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("DUPLICATE_ENVIRONMENT"));

    harbor(home.path())
        .args(["env", "register", "other", "--bind", "workspace=relative/path"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("INVALID_BINDING"));

    harbor(home.path())
        .args(["env", "delete", "home-mac"])
        .assert()
        .code(4);
}

#[test]
fn test_switch_and_delete() {
    let home = machine("home-mac", "/Users/test/playground");
    harbor(home.path())
        .args(["env", "register", "office", "--bind", "workspace=/home/dev/work"])
        .assert()
        .success();

    let switched = json_stdout(harbor(home.path()).args(["env", "switch", "office"]));
    assert_eq!(switched["is_current"], true);

    harbor(home.path()).args(["env", "delete", "home-mac"]).assert().success();
    harbor(home.path())
        .args(["env", "switch", "home-mac"])
        .assert()
        .code(3);
}

#[test]
fn test_env_resolve() {
    let home = machine("home-mac", "/Users/test/playground");
    let out = json_stdout(harbor(home.path()).args([
        "env",
        "resolve",
        "/Users/test/playground/harbor",
        "$claude_data/projects/xxx",
        "/var/log/system.log",
    ]));

    let paths = out["paths"].as_array().unwrap();
    assert_eq!(paths[0]["logical"], "$workspace/harbor");
    assert_eq!(paths[1]["absolute"], Value::Null);
    assert_eq!(paths[1]["resolvable"], false);
    assert_eq!(paths[2]["logical"], "/var/log/system.log");
    assert_eq!(paths[2]["absolute"], "/var/log/system.log");
}

#[test]
fn test_commands_need_an_environment() {
    let home = TempDir::new().unwrap();
    harbor(home.path()).arg("init").assert().success();

    harbor(home.path())
        .args(["env", "current"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("NOT_CONFIGURED"));
}

// ============================================================================
// sync
// ============================================================================

#[test]
fn test_export_then_import_on_another_machine() {
    let home = machine("home-mac", "/Users/test/playground");
    {
        let mut storage = SqliteStorage::open(&db_path(home.path())).unwrap();
        let mut port = Port::new("port_1", "Resolver");
        port.working_dir = Some("/Users/test/playground/harbor".into());
        storage.upsert_port(&port, "tester").unwrap();

        let mut session = Session::new("sess_1", "Pairing");
        session.cwd = Some("/Users/test/playground/harbor".into());
        session.transcript_path = Some("/Users/test/.claude/t.jsonl".into());
        storage.create_session(&session, "home-mac", "tester").unwrap();
    }

    let shared = TempDir::new().unwrap();
    let exported = json_stdout(harbor(home.path()).args(["sync", "export", "--dir"]).arg(shared.path()));
    assert_eq!(exported["stats"]["classes"]["port"], 1);

    let ports = std::fs::read_to_string(shared.path().join("ports.jsonl")).unwrap();
    assert!(ports.contains("$workspace/harbor"));
    let sessions = std::fs::read_to_string(shared.path().join("sessions.jsonl")).unwrap();
    assert!(!sessions.contains("transcript_path"));

    let office = machine("office", "/home/dev/work");
    let imported = json_stdout(
        harbor(office.path())
            .args(["sync", "import", "--strategy", "keep_remote", "--dir"])
            .arg(shared.path()),
    );
    assert_eq!(imported["classes"]["port"]["imported"], 1);
    assert_eq!(imported["classes"]["session"]["imported"], 1);

    let storage = SqliteStorage::open(&db_path(office.path())).unwrap();
    let port = storage.get_port("port_1").unwrap().unwrap();
    assert_eq!(port.working_dir.as_deref(), Some("/home/dev/work/harbor"));
    let session = storage.get_session("sess_1").unwrap().unwrap();
    assert_eq!(session.created_in_env.as_deref(), Some("home-mac"));
    assert_eq!(session.transcript_path, None);

    // Re-importing changes nothing
    let again = json_stdout(
        harbor(office.path())
            .args(["sync", "import", "--dir"])
            .arg(shared.path()),
    );
    assert_eq!(again["classes"]["port"]["unchanged"], 1);
    assert!(again["conflicts"].as_array().unwrap().is_empty());
}

#[test]
fn test_manual_conflict_then_resolve() {
    let home = machine("home-mac", "/Users/test/playground");
    let shared = TempDir::new().unwrap();
    {
        let mut storage = SqliteStorage::open(&db_path(home.path())).unwrap();
        storage.upsert_port(&Port::new("port_1", "Original"), "tester").unwrap();
    }
    harbor(home.path())
        .args(["sync", "export", "--dir"])
        .arg(shared.path())
        .assert()
        .success();
    {
        let mut storage = SqliteStorage::open(&db_path(home.path())).unwrap();
        let mut port = storage.get_port("port_1").unwrap().unwrap();
        port.title = "Edited locally".into();
        storage.upsert_port(&port, "tester").unwrap();
    }

    let result = json_stdout(
        harbor(home.path())
            .args(["sync", "import", "--dir"])
            .arg(shared.path()),
    );
    let conflict_id = result["conflicts"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(result["conflicts"][0]["differing_fields"][0], "title");

    let open = json_stdout(harbor(home.path()).args(["sync", "conflicts"]));
    assert_eq!(open.as_array().unwrap().len(), 1);

    let resolved = json_stdout(harbor(home.path()).args([
        "sync",
        "resolve",
        &conflict_id,
        "--keep",
        "remote",
    ]));
    assert_eq!(resolved["resolution"], "keep_remote");

    let storage = SqliteStorage::open(&db_path(home.path())).unwrap();
    assert_eq!(storage.get_port("port_1").unwrap().unwrap().title, "Original");

    harbor(home.path())
        .args(["sync", "resolve", &conflict_id, "--keep", "local"])
        .assert()
        .code(3);
}

#[test]
fn test_sync_argument_errors() {
    let home = machine("home-mac", "/Users/test/playground");
    let shared = TempDir::new().unwrap();

    harbor(home.path())
        .args(["sync", "import", "--strategy", "newest", "--dir"])
        .arg(shared.path())
        .assert()
        .code(4)
        .stderr(predicate::str::contains("strategy"));

    harbor(home.path())
        .args(["sync", "export", "--class", "widgets", "--dir"])
        .arg(shared.path())
        .assert()
        .code(4);
}

#[test]
fn test_push_requires_configuration() {
    let home = machine("home-mac", "/Users/test/playground");
    harbor(home.path())
        .args(["sync", "push"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("sync configure"));
}

#[test]
fn test_configure_persists_settings() {
    let home = machine("home-mac", "/Users/test/playground");
    let repo = TempDir::new().unwrap();

    let settings = json_stdout(
        harbor(home.path())
            .args(["sync", "configure", "--branch", "state", "--strategy", "keep_local", "--repo"])
            .arg(repo.path()),
    );
    assert_eq!(settings["branch"], "state");
    assert_eq!(settings["remote"], "origin");
    assert_eq!(settings["default_strategy"], "keep_local");

    let config = std::fs::read_to_string(home.path().join("config.json")).unwrap();
    assert!(config.contains("keep_local"));
}
