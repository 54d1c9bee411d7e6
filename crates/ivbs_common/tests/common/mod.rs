//! Scripted stand-in for the VBScript interpreter.
//!
//! Speaks the file protocol: reads `$IVBS_CMD_PATH`, echoes the body to
//! stdout and answers through `$IVBS_RET_PATH` with the header line first.
//! Special bodies:
//! - `WScript.Quit` exits cleanly
//! - `die` exits with status 3 without answering
//! - `hang` never answers
//! - `fail:<text>` answers with `<text>` as error output

#![allow(dead_code)]

use ivbs_common::channel::{ChannelPaths, CommandChannel};
use ivbs_common::config::InterpreterConfig;
use ivbs_common::history::HistoryStore;
use ivbs_common::supervisor::Supervisor;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FAKE_INTERPRETER: &str = r#"#!/bin/sh
while :; do
  if [ -f "$IVBS_CMD_PATH" ]; then
    cmd=$(cat "$IVBS_CMD_PATH")
    rm -f "$IVBS_CMD_PATH"
    header=$(printf '%s\n' "$cmd" | head -n 1)
    body=$(printf '%s\n' "$cmd" | tail -n +2)
    case "$body" in
      WScript.Quit) exit 0 ;;
      die) exit 3 ;;
      hang) ;;
      fail:*)
        printf '%s\n%s' "$header" "${body#fail:}" > "$IVBS_RET_PATH.tmp"
        mv "$IVBS_RET_PATH.tmp" "$IVBS_RET_PATH"
        ;;
      *)
        printf '%s\n' "$body"
        printf '%s\n' "$header" > "$IVBS_RET_PATH.tmp"
        mv "$IVBS_RET_PATH.tmp" "$IVBS_RET_PATH"
        ;;
    esac
  fi
  sleep 0.05
done
"#;

pub fn write_fake_interpreter(dir: &Path) -> PathBuf {
    let script = dir.join("fake_interpreter.sh");
    fs::write(&script, FAKE_INTERPRETER).unwrap();
    script
}

pub fn interpreter_config(dir: &Path) -> InterpreterConfig {
    let script = write_fake_interpreter(dir);
    InterpreterConfig {
        program: "sh".to_string(),
        args: vec![script.to_string_lossy().into_owned()],
        working_dir: Some(dir.to_path_buf()),
        quit_command: "WScript.Quit".to_string(),
        shutdown_grace_secs: 5,
    }
}

pub fn fake_supervisor(dir: &Path) -> Supervisor {
    supervisor_with(dir, interpreter_config(dir))
}

pub fn supervisor_with(dir: &Path, interpreter: InterpreterConfig) -> Supervisor {
    let runtime = dir.join("runtime_data");
    let channel = CommandChannel::new(&runtime, ChannelPaths::in_dir(&runtime, "test"))
        .with_poll_interval(Duration::from_millis(20));
    let history = HistoryStore::new(dir.join("history.db"));
    Supervisor::new(interpreter, channel, history)
        .with_command_timeout(Some(Duration::from_secs(10)))
}
