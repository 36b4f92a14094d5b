use assert_cmd::prelude::*;
use color_eyre::Result;
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::unistd::Pid;
use std::net::TcpListener;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::tempdir;

// Nothing listens here; any request would fail with a connection error
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/";

fn moor() -> Result<Command> {
    let mut cmd = Command::cargo_bin("moor")?;
    cmd.env_remove("RUST_LOG")
        .env("MOOR_METADATA_ENDPOINT", DEAD_ENDPOINT)
        .env("MOOR_AWS_CLI", "/nonexistent/aws");
    Ok(cmd)
}

#[test]
fn test_help_lists_subcommands() -> Result<()> {
    let output = moor()?.arg("--help").output()?;

    assert!(output.status.success(), "Stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: moor [OPTIONS] <COMMAND>"), "Missing usage text");
    assert!(stdout.contains("metadata-fetch"));
    assert!(stdout.contains("ensure-volume-attached"));
    assert!(stdout.contains("associate-elastic-ip"));

    Ok(())
}

#[test]
fn test_no_subcommand_is_usage_error() -> Result<()> {
    let output = moor()?.output()?;
    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

#[test]
fn test_bad_volume_id_fails_before_network() -> Result<()> {
    let temp = tempdir()?;
    let token_dir = temp.path().join("tokens");

    let output = moor()?
        .env("MOOR_TOKEN_DIR", &token_dir)
        .args(["ensure-volume-attached", "vol-123", "/mnt/data"])
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("vol-123"), "Stderr: {}", stderr);
    assert!(stderr.contains("Usage:"), "Missing subcommand help: {}", stderr);
    // no token was requested, so the cache directory was never created
    assert!(!token_dir.exists());

    Ok(())
}

#[test]
fn test_relative_mount_point_is_usage_error() -> Result<()> {
    let output = moor()?
        .args(["ensure-volume-attached", "vol-0123456789abcdef0", "mnt/data"])
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

#[test]
fn test_foreign_url_is_refused() -> Result<()> {
    let temp = tempdir()?;

    let output = moor()?
        .env("MOOR_TOKEN_DIR", temp.path())
        .args(["metadata-fetch", "http://198.51.100.1/latest/meta-data/"])
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("untrusted url"), "Stderr: {}", stderr);
    assert!(output.stdout.is_empty());

    Ok(())
}

#[test]
fn test_interrupt_stops_metadata_fetch() -> Result<()> {
    // accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let endpoint = format!("http://{}/", listener.local_addr()?);
    let temp = tempdir()?;

    let mut cmd = moor()?;
    cmd.env("MOOR_METADATA_ENDPOINT", &endpoint)
        .env("MOOR_TOKEN_DIR", temp.path())
        .args(["metadata-fetch", "latest/meta-data/ami-id"]);
    // an ignored SIGINT would be inherited from a backgrounded test runner
    unsafe {
        cmd.pre_exec(|| {
            signal(Signal::SIGINT, SigHandler::SigDfl)?;
            Ok(())
        });
    }
    let mut child = cmd.spawn()?;

    sleep(Duration::from_millis(300));
    let sent = Instant::now();
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT)?;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if sent.elapsed() > Duration::from_secs(3) {
            child.kill()?;
            panic!("moor ignored SIGINT during metadata-fetch");
        }
        sleep(Duration::from_millis(20));
    };

    assert_eq!(status.signal(), Some(Signal::SIGINT as i32));
    drop(listener);
    Ok(())
}
