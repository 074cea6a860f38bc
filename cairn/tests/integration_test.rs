use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn cairn(args: &[&str], root: &Path, store: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cairn"))
        .args(args)
        .arg("--namespace")
        .arg("octocat/hello-world")
        .arg("--root")
        .arg(root)
        .arg("--cache-dir")
        .arg(store)
        .current_dir(root)
        .env_remove("DRONE_COMMIT_BRANCH")
        .env_remove("CI_COMMIT_BRANCH")
        .output()
        .expect("Failed to execute cairn")
}

fn create_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let deps = dir.path().join("node_modules/left-pad");
    fs::create_dir_all(&deps).unwrap();
    fs::write(deps.join("index.js"), "module.exports = 1;\n").unwrap();
    fs::create_dir_all(dir.path().join("target")).unwrap();
    fs::write(dir.path().join("target/app"), "binary").unwrap();
    dir
}

#[test]
fn test_rebuild_then_restore() {
    let work = create_workspace();
    let store = TempDir::new().unwrap();

    let output = cairn(&["rebuild", "node_modules", "target"], work.path(), store.path());
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Rebuild finished"));

    fs::remove_dir_all(work.path().join("node_modules")).unwrap();
    fs::remove_dir_all(work.path().join("target")).unwrap();

    let output = cairn(&["restore", "--format", "gzip"], work.path(), store.path());
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        fs::read_to_string(work.path().join("node_modules/left-pad/index.js")).unwrap(),
        "module.exports = 1;\n"
    );
    assert_eq!(fs::read_to_string(work.path().join("target/app")).unwrap(), "binary");
}

#[test]
fn test_missing_mount_fails_with_mount_in_message() {
    let work = create_workspace();
    let store = TempDir::new().unwrap();

    let output = cairn(&["rebuild", "node_modules", "missing"], work.path(), store.path());
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("mount <missing>"));
    assert!(!stderr.contains("mount <node_modules>"));
}

#[test]
fn test_restore_fails_when_key_is_required() {
    let work = create_workspace();
    let store = TempDir::new().unwrap();

    let output = cairn(
        &["restore", "--fail-if-key-not-present"],
        work.path(),
        store.path(),
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No cached objects found"));
}

#[test]
fn test_key_json_is_stable() {
    let work = create_workspace();
    let store = TempDir::new().unwrap();

    let first = cairn(&["key", "--json"], work.path(), store.path());
    let second = cairn(&["key", "--json"], work.path(), store.path());
    assert!(first.status.success());

    let first: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
    let second: serde_json::Value = serde_json::from_slice(&second.stdout).unwrap();
    assert_eq!(first, second);
    assert_eq!(first["fallback"], false);
    assert!(first["prefix"]
        .as_str()
        .unwrap()
        .starts_with("octocat/hello-world/"));
}

#[test]
fn test_invalid_log_level_is_rejected() {
    let work = create_workspace();
    let store = TempDir::new().unwrap();

    let output = cairn(&["key", "--log-level", "verbose"], work.path(), store.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown log level"));
}

#[test]
fn test_config_file_is_used() {
    let work = create_workspace();
    let store = TempDir::new().unwrap();
    fs::write(
        work.path().join("cairn.toml"),
        r#"
mounts = ["target"]

[archive]
format = "zstd"
"#,
    )
    .unwrap();

    let output = cairn(&["rebuild"], work.path(), store.path());
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("zstd"));
}
