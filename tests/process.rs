#![cfg(unix)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;

use offline_update_transfer::error::TransferError;
use offline_update_transfer::process::{
    OutputObserver, ProcessInvocation, ProcessRunner, StreamKind,
};

#[derive(Default)]
struct Recorder {
    lines: Mutex<Vec<(StreamKind, String)>>,
    ticks: AtomicUsize,
}

impl OutputObserver for Recorder {
    fn on_line(&self, stream: StreamKind, line: &str) {
        self.lines.lock().unwrap().push((stream, line.to_string()));
    }

    fn on_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn captures_both_streams_and_exit_code() {
    let invocation = ProcessInvocation::new("/bin/sh")
        .arg("-c")
        .arg("echo out one; echo 'err line' >&2; echo out two; exit 3");
    let recorder = Recorder::default();
    let result = ProcessRunner::default()
        .run_observed(&invocation, &recorder)
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
    assert_eq!(result.stdout, "out one\nout two\n");
    assert_eq!(result.stderr, "err line\n");

    let lines = recorder.lines.lock().unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(&(StreamKind::Stderr, "err line".to_string())));
    assert!(recorder.ticks.load(Ordering::SeqCst) >= 1);
}

#[test]
fn working_directory_is_applied() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("marker.txt"), b"here").unwrap();
    let invocation = ProcessInvocation::new("/bin/sh")
        .args(["-c", "cat marker.txt"])
        .current_dir(temp.path());
    let result = ProcessRunner::default().run(&invocation).unwrap();
    assert_eq!(result.stdout.trim(), "here");
}

#[test]
fn timeout_kills_the_child_promptly() {
    let invocation = ProcessInvocation::new("sleep")
        .arg("30")
        .timeout(Some(Duration::from_millis(300)));
    let started = Instant::now();
    let err = ProcessRunner::new(Duration::from_millis(100))
        .run(&invocation)
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_matches!(err, TransferError::Timeout { ref command, .. } if command == "sleep 30");
}

#[test]
fn timeout_also_kills_processes_the_tool_started() {
    let temp = tempfile::tempdir().unwrap();
    let script = temp.path().join("tool.sh");
    std::fs::write(&script, "#!/bin/sh\necho starting\nsleep 8\necho done\n").unwrap();
    let invocation = ProcessInvocation::new("/bin/sh")
        .arg(script.to_string_lossy())
        .timeout(Some(Duration::from_millis(300)));
    let recorder = Recorder::default();
    let started = Instant::now();
    let err = ProcessRunner::new(Duration::from_millis(100))
        .run_observed(&invocation, &recorder)
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert_matches!(err, TransferError::Timeout { .. });
    let lines = recorder.lines.lock().unwrap();
    assert!(!lines.iter().any(|(_, line)| line == "done"));
}

#[test]
fn ticks_arrive_while_the_child_runs() {
    let invocation = ProcessInvocation::new("sleep").arg("1");
    let recorder = Recorder::default();
    ProcessRunner::new(Duration::from_millis(100))
        .run_observed(&invocation, &recorder)
        .unwrap();
    assert!(recorder.ticks.load(Ordering::SeqCst) >= 5);
}

#[test]
fn missing_program_is_a_spawn_error() {
    let invocation = ProcessInvocation::new("/no/such/program").arg("-prepare");
    assert_matches!(
        ProcessRunner::default().run(&invocation),
        Err(TransferError::Spawn { .. })
    );
}
