//! Supervisor lifecycle against a scripted fake interpreter.

#![cfg(unix)]

mod common;

use common::{fake_supervisor, supervisor_with};
use ivbs_common::config::InterpreterConfig;
use ivbs_common::supervisor::SupervisorError;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_start_submit_shutdown() {
    let dir = TempDir::new().unwrap();
    let mut sup = fake_supervisor(dir.path());

    sup.start().unwrap();
    assert!(sup.is_running());
    assert!(sup.session_id().is_some());
    assert!(sup.pid().is_some());

    let response = sup.submit("WScript.Echo 1").unwrap();
    assert_eq!(response.stdout, "WScript.Echo 1\n");
    assert_eq!(response.stderr, "");

    let response = sup.submit("fail:Type mismatch").unwrap();
    assert_eq!(response.stdout, "");
    assert_eq!(response.stderr, "Type mismatch");

    sup.shutdown().unwrap();
    assert!(!sup.is_running());
    assert!(!sup.history().is_connected());
}

#[test]
fn test_start_twice_is_already_running() {
    let dir = TempDir::new().unwrap();
    let mut sup = fake_supervisor(dir.path());
    sup.start().unwrap();
    assert!(matches!(sup.start(), Err(SupervisorError::AlreadyRunning)));
    sup.shutdown().unwrap();
}

#[test]
fn test_restart_issues_new_session() {
    let dir = TempDir::new().unwrap();
    let mut sup = fake_supervisor(dir.path());
    sup.start().unwrap();
    let first = sup.session_id().unwrap().to_string();
    sup.history_mut().append(1, "x = 1").unwrap();

    sup.restart().unwrap();
    let second = sup.session_id().unwrap().to_string();
    assert_ne!(first, second);
    assert!(sup.is_running());

    // Earlier session stays in the shared store
    let tail = sup.history().tail(10).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].session_id, first);

    let response = sup.submit("after restart").unwrap();
    assert_eq!(response.stdout, "after restart\n");
    sup.shutdown().unwrap();
}

#[test]
fn test_interpreter_exit_is_detected() {
    let dir = TempDir::new().unwrap();
    let mut sup = fake_supervisor(dir.path());
    sup.start().unwrap();

    let err = sup.submit("die").unwrap_err();
    assert!(matches!(err, SupervisorError::InterpreterExited { code: Some(3) }));
    assert!(matches!(sup.submit("x"), Err(SupervisorError::NotRunning)));

    // Restart recovers the session
    sup.restart().unwrap();
    assert_eq!(sup.submit("back").unwrap().stdout, "back\n");
    sup.shutdown().unwrap();
}

#[test]
fn test_unanswered_command_times_out() {
    let dir = TempDir::new().unwrap();
    let mut sup = fake_supervisor(dir.path()).with_command_timeout(Some(Duration::from_millis(300)));
    sup.start().unwrap();

    let err = sup.submit("hang").unwrap_err();
    assert!(matches!(err, SupervisorError::Timeout(_)));
    assert!(sup.is_running());
    sup.shutdown().unwrap();
}

#[test]
fn test_shutdown_kills_interpreter_ignoring_quit() {
    let dir = TempDir::new().unwrap();
    let interpreter = InterpreterConfig {
        program: "sleep".to_string(),
        args: vec!["30".to_string()],
        working_dir: None,
        quit_command: "WScript.Quit".to_string(),
        shutdown_grace_secs: 1,
    };
    let mut sup = supervisor_with(dir.path(), interpreter);
    sup.start().unwrap();

    let started = Instant::now();
    sup.shutdown().unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10));
    assert!(!sup.is_running());
}

#[test]
fn test_child_environment_names_channel_files() {
    let dir = TempDir::new().unwrap();
    let interpreter = InterpreterConfig {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            "echo \"$IVBS_CMD_PATH|$IVBS_RET_PATH|$IVBS_DEBUG_PATH\"; exec sleep 30".to_string(),
        ],
        working_dir: None,
        quit_command: "WScript.Quit".to_string(),
        shutdown_grace_secs: 0,
    };
    let mut sup = supervisor_with(dir.path(), interpreter);
    sup.start().unwrap();

    let log_path = sup.channel().paths().stdout_log.clone();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut line = String::new();
    while Instant::now() < deadline {
        line = std::fs::read_to_string(&log_path).unwrap();
        if line.ends_with('\n') {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let paths = sup.channel().paths();
    let expected = format!(
        "{}|{}|{}\n",
        paths.command.display(),
        paths.response.display(),
        paths.debug_log.display()
    );
    assert_eq!(line, expected);
    // The daemon's own environment is untouched
    assert!(std::env::var_os("IVBS_CMD_PATH").is_none());
    sup.shutdown().unwrap();
}

#[test]
fn test_drop_kills_child() {
    let dir = TempDir::new().unwrap();
    let mut sup = fake_supervisor(dir.path());
    sup.start().unwrap();
    let pid = sup.pid().unwrap() as i32;
    drop(sup);

    // The pid has been reaped, so signal 0 finds nothing
    let gone = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err();
    assert!(gone);
}
