#![cfg(all(unix, feature = "cli"))]

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/h2pipe-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("server socket never became connectable");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_server(sock_path: &Path) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_h2pipe"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg(format!("unix:{}", sock_path.display()))
        .arg("--shutdown-timeout")
        .arg("2s")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn probe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_h2pipe"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("probe should run")
}

fn interrupt(child: &Child) {
    let status = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .expect("kill should run");
    assert!(status.success());
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("try_wait should succeed") {
            return Some(status);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn probe_gets_hello_world_and_serve_stops_on_interrupt() {
    let dir = unique_temp_dir("hello");
    let sock_path = dir.join("server.sock");
    let endpoint = format!("unix:{}", sock_path.display());
    let mut child = spawn_server(&sock_path);

    let output = probe(&["--format", "json", "probe", &endpoint]);
    assert!(
        output.status.success(),
        "probe failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\":\"response\""));
    assert!(stdout.contains("\"status\":200"));
    assert!(stdout.contains("Hello, World!"));

    let echoed = probe(&[
        "--format",
        "raw",
        "probe",
        &endpoint,
        "--method",
        "POST",
        "--data",
        "ping",
    ]);
    assert!(echoed.status.success());
    assert_eq!(echoed.stdout, b"ping");

    interrupt(&child);
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    let status = match status {
        Some(status) => status,
        None => {
            let _ = child.kill();
            panic!("serve did not exit after SIGINT");
        }
    };
    assert_eq!(status.code(), Some(0));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn probe_missing_socket_returns_3() {
    let dir = unique_temp_dir("missing");
    let endpoint = format!("unix:{}", dir.join("absent.sock").display());

    let output = probe(&["probe", &endpoint, "--timeout", "1s"]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn probe_bad_header_returns_64() {
    let output = probe(&["probe", "unix:/tmp/unused.sock", "--header", "no-colon"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn probe_memory_endpoint_is_a_usage_error() {
    let output = probe(&["probe", "memory:local"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = probe(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
