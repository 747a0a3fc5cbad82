// PROCBENCH PROCESS RUNNER TESTS
// REAL CHILD PROCESSES, BUT /bin/sh SCRIPTS STAND IN FOR THE WORKLOAD BINARY
// SO EVERY TEST CONTROLS EXACTLY WHAT THE CHILD PRINTS AND WHEN IT EXITS.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use procbench::deadline::{CancelToken, Deadline};
use procbench::parse::StatsLayout;
use procbench::runner::{
    Invocation, ProcessRunner, RunError, SigQuit, TerminateOutcome, Terminator,
};

const SCHED_OUTPUT: &str = r"1 2 3\n::::::::::\n1 2 3 4 5 6 7 8 9 10 11 12 13 99 88\n::::::::::\nkey\n-\nfoo\nbar\n";

fn sh(script: &str) -> Invocation {
    Invocation {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        layout: StatsLayout::Scheduler,
        variant: "cpu".to_string(),
    }
}

// REAL SIGQUIT, BUT COUNTED
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl Terminator for Counting {
    fn terminate(&self, child: &mut Child) -> io::Result<TerminateOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SigQuit.terminate(child)
    }
}

struct Refusing;

impl Terminator for Refusing {
    fn terminate(&self, _child: &mut Child) -> io::Result<TerminateOutcome> {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
}

fn counting_runner() -> ProcessRunner<Counting> {
    ProcessRunner::with_terminator(Counting::default()).poll_interval(Duration::from_millis(20))
}

// === NATURAL EXIT ===

#[test]
fn natural_exit_is_parsed_without_signal() {
    let runner = counting_runner();
    let inv = sh(&format!("printf '{}'", SCHED_OUTPUT));

    let record = runner
        .run_to_completion(&inv, &Deadline::after(Duration::from_secs(10)))
        .unwrap();

    assert_eq!(record.get("time_on_cpu"), Some("1"));
    assert_eq!(record.get("wait_on_runqueue"), Some("2"));
    assert_eq!(record.get("timeslices_ran"), Some("3"));
    assert_eq!(record.get("utime_jiffies"), Some("99"));
    assert_eq!(record.get("kernal_time_jiffies"), Some("88"));
    assert_eq!(record.get("foo"), Some("bar"));
    assert_eq!(record.get("type"), Some("cpu"));
    assert_eq!(record.len(), 7);
    assert_eq!(runner.terminator().calls.load(Ordering::SeqCst), 0);
}

// === DEADLINE ===

#[test]
fn expired_deadline_signals_exactly_once() {
    let runner = counting_runner();
    let inv = sh(&format!(
        "trap \"printf '{}'; exit 0\" QUIT; while :; do sleep 0.05; done",
        SCHED_OUTPUT
    ));

    let started = Instant::now();
    let record = runner
        .run_to_completion(&inv, &Deadline::after(Duration::from_millis(200)))
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(runner.terminator().calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.get("foo"), Some("bar"));
    assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
}

#[test]
fn cancelled_token_signals_before_deadline() {
    let runner = counting_runner();
    let inv = sh(&format!(
        "trap \"printf '{}'; exit 0\" QUIT; while :; do sleep 0.05; done",
        SCHED_OUTPUT
    ));
    let shutdown = CancelToken::new();
    let deadline = Deadline::after(Duration::from_secs(60)).linked_to(&shutdown);

    let canceller = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown.cancel();
        })
    };

    let started = Instant::now();
    let record = runner.run_to_completion(&inv, &deadline).unwrap();
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(runner.terminator().calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.get("utime_jiffies"), Some("99"));
}

#[test]
fn failed_termination_kills_child() {
    let runner = ProcessRunner::with_terminator(Refusing).poll_interval(Duration::from_millis(10));
    let inv = sh("while :; do sleep 0.05; done");

    let started = Instant::now();
    let err = runner
        .run_to_completion(&inv, &Deadline::after(Duration::from_millis(50)))
        .unwrap_err();

    assert!(matches!(err, RunError::Termination { .. }), "{}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}

// === FAILURES ===

#[test]
fn nonzero_exit_is_process_failed() {
    let runner = counting_runner();
    let inv = sh("echo boom >&2; exit 3");
    let err = runner
        .run_to_completion(&inv, &Deadline::after(Duration::from_secs(10)))
        .unwrap_err();
    match err {
        RunError::ProcessFailed { status, stderr, .. } => {
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr.trim(), "boom");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn garbage_output_is_malformed() {
    let runner = counting_runner();
    let inv = sh("echo garbage");
    let err = runner
        .run_to_completion(&inv, &Deadline::after(Duration::from_secs(10)))
        .unwrap_err();
    match err {
        RunError::MalformedOutput { output, .. } => assert_eq!(output, "garbage\n"),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn missing_program_is_launch_error() {
    let runner = counting_runner();
    let inv = Invocation {
        program: PathBuf::from("/nonexistent/procbench"),
        ..sh("")
    };
    let err = runner
        .run_to_completion(&inv, &Deadline::after(Duration::from_secs(1)))
        .unwrap_err();
    assert!(matches!(err, RunError::Launch { .. }), "{}", err);
}

#[test]
fn done_deadline_never_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("started");
    let runner = counting_runner();
    let inv = sh(&format!("touch {}", marker.display()));

    let shutdown = CancelToken::new();
    shutdown.cancel();
    let cancelled = Deadline::after(Duration::from_secs(10)).linked_to(&shutdown);
    let expired = Deadline::at(Instant::now());

    for deadline in [&cancelled, &expired] {
        let err = runner.run_to_completion(&inv, deadline).unwrap_err();
        assert!(matches!(err, RunError::Cancelled), "{}", err);
    }
    assert!(!marker.exists());
    assert_eq!(runner.terminator().calls.load(Ordering::SeqCst), 0);
}

// === TERMINATOR ===

#[test]
fn sigquit_on_reaped_child_is_already_exited() {
    let mut child = Command::new("/bin/true").spawn().unwrap();
    child.wait().unwrap();
    assert_eq!(SigQuit.terminate(&mut child).unwrap(), TerminateOutcome::AlreadyExited);
}

#[test]
fn sigquit_on_live_child_terminates() {
    let mut child = Command::new("/bin/sleep").arg("30").spawn().unwrap();
    assert_eq!(SigQuit.terminate(&mut child).unwrap(), TerminateOutcome::Terminated);
    let status = child.wait().unwrap();
    assert!(!status.success());
}
