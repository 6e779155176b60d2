//! Cross-process tests driving the `buscast` binary.

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use buscast::{BusHandle, IoFlags, OpenFlags};
use tempfile::TempDir;

const BUSCAST: &str = env!("CARGO_BIN_EXE_buscast");

fn buscast(args: &[&str]) -> Output {
    Command::new(BUSCAST)
        .args(args)
        .env("BUSCAST_LOG", "warn")
        .env_remove("BUSCAST_CONFIG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

/// Block until `count` listeners are registered on the bus.
fn wait_for_listeners(path: &Path, count: u32) {
    let probe = BusHandle::connect(path, OpenFlags::RDONLY).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while probe.listener_count().unwrap() < count {
        assert!(Instant::now() < deadline, "listener never registered");
        thread::sleep(Duration::from_millis(5));
    }
}

fn create_bus(dir: &TempDir) -> String {
    let path = dir.path().join("bus");
    let output = buscast(&["create", path.to_str().unwrap(), "--excl"]);
    assert!(output.status.success());
    let printed = stdout(&output).trim().to_string();
    assert_eq!(printed, path.to_str().unwrap());
    printed
}

#[test]
fn test_messages_cross_process_boundary() {
    let dir = TempDir::new().unwrap();
    let bus = create_bus(&dir);

    let listener = Command::new(BUSCAST)
        .args(["listen", &bus, "--count", "2"])
        .env("BUSCAST_LOG", "warn")
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    wait_for_listeners(Path::new(&bus), 1);

    assert!(buscast(&["broadcast", &bus, "hello"]).status.success());
    assert!(buscast(&["broadcast", &bus, "world"]).status.success());

    let output = listener.wait_with_output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output), "hello\nworld\n");
    assert_eq!(stdout(&buscast(&["listeners", &bus])).trim(), "0");
}

#[test]
fn test_library_writer_reaches_cli_listener() {
    let dir = TempDir::new().unwrap();
    let bus = create_bus(&dir);

    let mut waiter = Command::new(BUSCAST)
        .args(["wait", &bus])
        .env("BUSCAST_LOG", "warn")
        .spawn()
        .unwrap();
    wait_for_listeners(Path::new(&bus), 1);

    let mut writer = BusHandle::connect(&bus, OpenFlags::WRONLY).unwrap();
    writer.write("go", IoFlags::empty()).unwrap();

    assert!(waiter.wait().unwrap().success());
    assert_eq!(writer.listener_count().unwrap(), 0);
}

#[test]
fn test_cli_lifecycle_commands() {
    let dir = TempDir::new().unwrap();
    let bus = create_bus(&dir);

    // Exclusive create of an existing bus fails; plain create is a no-op.
    assert!(!buscast(&["create", &bus, "--excl"]).status.success());
    assert!(buscast(&["create", &bus]).status.success());

    let chmod = buscast(&["chmod", "640", &bus]);
    assert!(chmod.status.success());
    assert_eq!(stdout(&chmod).trim(), "660");

    assert_eq!(stdout(&buscast(&["listeners", &bus])).trim(), "0");

    assert!(buscast(&["unlink", &bus]).status.success());
    assert!(!buscast(&["unlink", &bus]).status.success());
    assert!(!buscast(&["broadcast", &bus, "gone"]).status.success());
}

#[test]
fn test_cli_rejects_oversized_message() {
    let dir = TempDir::new().unwrap();
    let bus = create_bus(&dir);
    let message = "x".repeat(buscast::MESSAGE_MAX + 1);

    let output = buscast(&["broadcast", &bus, &message]);
    assert!(!output.status.success());
}

#[test]
fn test_anonymous_create_uses_configured_directory() {
    let dir = TempDir::new().unwrap();
    let runtime = dir.path().join("runtime");

    let output = Command::new(BUSCAST)
        .arg("create")
        .env("BUSCAST__BUS_DIR", &runtime)
        .env("BUSCAST_LOG", "warn")
        .env_remove("BUSCAST_CONFIG")
        .output()
        .unwrap();
    assert!(output.status.success());

    let created = stdout(&output).trim().to_string();
    assert!(Path::new(&created).starts_with(&runtime));
    assert!(Path::new(&created).exists());
}

#[test]
fn test_cli_ownership_to_current_owner() {
    use std::os::unix::fs::MetadataExt;

    let dir = TempDir::new().unwrap();
    let bus = create_bus(&dir);
    let meta = std::fs::metadata(&bus).unwrap();
    let owner = format!("{}:{}", meta.uid(), meta.gid());
    let group = meta.gid().to_string();

    assert!(buscast(&["chown", &owner, &bus]).status.success());
    assert!(buscast(&["chgrp", &group, &bus]).status.success());
    assert!(!buscast(&["chgrp", "no-such-group-buscast", &bus]).status.success());

    let after = std::fs::metadata(&bus).unwrap();
    assert_eq!((after.uid(), after.gid()), (meta.uid(), meta.gid()));
}
