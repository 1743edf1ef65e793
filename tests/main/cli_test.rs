//! CLI contract tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

use crate::support::kernel::FakeKernel;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

fn write_config(dir: &Path, socket: &Path) -> PathBuf {
    let path = dir.join("uranus.toml");
    let contents = format!(
        "[kernel]\nsocket = {:?}\nlocal_dir = {:?}\nlocal_prefix = \"cli\"\nexec_timeout_ms = 500\n\n\
         [storage]\ndb = {:?}\n\n[logging]\ndir = {:?}\n",
        socket.display().to_string(),
        dir.display().to_string(),
        dir.join("uranus.db").display().to_string(),
        dir.join("logs").display().to_string(),
    );
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn main_defines_primary_subcommands() {
    let source = main_source();
    assert!(source.contains("Start"));
    assert!(source.contains("Echo"));
    assert!(source.contains("Shutdown"));
    assert!(source.contains("Exec"));
}

#[test]
fn help_lists_subcommands() {
    let output = Command::cargo_bin("uranus")
        .expect("binary")
        .arg("--help")
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["start", "echo", "shutdown", "exec"] {
        assert!(stdout.contains(name), "help is missing {name}: {stdout}");
    }
}

#[test]
fn invalid_config_fails_before_doing_anything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("uranus.toml");
    fs::write(&path, "[watchdog]\ninterval_secs = 0\n").expect("write");

    let output = Command::cargo_bin("uranus")
        .expect("binary")
        .args(["--config", path.to_str().expect("utf-8 path"), "echo"])
        .output()
        .expect("run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("interval_secs"));
}

#[test]
fn exec_rejects_non_json_requests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), &dir.path().join("hackernel.sock"));

    let output = Command::cargo_bin("uranus")
        .expect("binary")
        .args(["--config", config.to_str().expect("utf-8 path"), "exec", "not json"])
        .output()
        .expect("run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("exec failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_prints_the_kernel_reply() {
    let kernel = FakeKernel::spawn().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), &kernel.socket_path());

    let output = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("uranus")
            .expect("binary")
            .args(["--config", config.to_str().expect("utf-8 path"), "echo", "hello"])
            .output()
            .expect("run")
    })
    .await
    .expect("join");

    assert!(output.status.success(), "{output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"hello\"");
    assert_eq!(kernel.requests_of("user::test::echo")[0]["extra"], "hello");
}
