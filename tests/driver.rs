// PROCBENCH EXPERIMENT DRIVER TESTS
// WAVE BARRIER, FAILURE ISOLATION, ALTERNATION AND SHUTDOWN.
//
// A RECORDING LAUNCHER REPLACES THE PROCESS RUNNER. THE LAST SECTION RUNS THE
// REAL BINARY; READING /proc/self NEEDS NO ROOT.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use procbench::deadline::{CancelToken, Deadline};
use procbench::driver::{ExperimentDriver, Launcher};
use procbench::experiment::{Mode, Phase, RunConfig};
use procbench::parse::StatMap;
use procbench::runner::{Invocation, ProcessRunner, RunError};
use procbench::store::ResultRecord;

#[derive(Default)]
struct Recording {
    // COMPLETED COUNT SEEN BY EACH START, IN START ORDER
    starts: Mutex<Vec<usize>>,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    budgets: Mutex<Vec<Option<Duration>>>,
    // VARIANTS THAT FAIL INSTEAD OF PRODUCING A RECORD
    failing: Vec<&'static str>,
    // CANCELLED BY THE FIRST LAUNCH, STANDING IN FOR CTRL+C MID-WAVE
    cancel_on_first: Option<CancelToken>,
    calls: AtomicUsize,
}

impl Recording {
    fn failing(variants: &[&'static str]) -> Self {
        Self {
            failing: variants.to_vec(),
            ..Self::default()
        }
    }
}

impl Launcher for Recording {
    fn launch(&self, invocation: &Invocation, deadline: &Deadline) -> Result<ResultRecord, RunError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(token) = &self.cancel_on_first {
                token.cancel();
            }
        }
        self.starts
            .lock()
            .unwrap()
            .push(self.completed.load(Ordering::SeqCst));
        self.budgets.lock().unwrap().push(deadline.remaining());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(5));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(&invocation.variant.as_str()) {
            return Err(RunError::MalformedOutput {
                pid: 0,
                source: procbench::parse::ParseError::MissingSeparator,
                output: String::new(),
            });
        }
        let mut map = StatMap::new();
        map.insert("type".to_string(), invocation.variant.clone());
        Ok(ResultRecord::from(map))
    }
}

fn config(dir: &tempfile::TempDir, phase: Phase, procs: usize, batch: usize) -> RunConfig {
    RunConfig {
        mode: Mode::IoCpu,
        phase,
        max_time: 1,
        step: 1,
        procs,
        batch,
        output_dir: dir.path().to_path_buf(),
        ..RunConfig::default()
    }
}

fn type_counts(records: &[ResultRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for r in records {
        *counts.entry(r.get("type").unwrap_or("").to_string()).or_insert(0) += 1;
    }
    counts
}

// === WAVES ===

#[test]
fn waves_are_full_joins() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::Cpu, 25, 10);
    let driver = ExperimentDriver::new(&cfg, Recording::default());

    let summary = driver.execute();

    assert_eq!(summary.wave_sizes, vec![10, 10, 5]);
    assert_eq!(summary.launched, 25);
    assert_eq!(summary.succeeded, 25);
    assert_eq!(summary.failed, 0);

    let launcher = driver.launcher();
    let starts = launcher.starts.lock().unwrap();
    assert_eq!(starts.len(), 25);
    for (i, seen) in starts.iter().enumerate() {
        assert!(*seen >= (i / 10) * 10, "start {} saw only {} completed", i, seen);
    }
    assert!(launcher.max_in_flight.load(Ordering::SeqCst) <= 10);
}

#[test]
fn batch_of_one_is_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::Io, 4, 1);
    let driver = ExperimentDriver::new(&cfg, Recording::default());

    let summary = driver.execute();

    assert_eq!(summary.wave_sizes, vec![1, 1, 1, 1]);
    assert_eq!(driver.launcher().max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(*driver.launcher().starts.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn every_duration_and_experiment_gets_a_label() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        max_time: 3,
        ..config(&dir, Phase::All, 2, 2)
    };
    let driver = ExperimentDriver::new(&cfg, Recording::default());

    let summary = driver.execute();

    let labels: Vec<String> = driver.store().snapshot().keys().cloned().collect();
    assert_eq!(labels.len(), 9);
    for secs in 1..=3 {
        for name in ["cpu-only", "io-only", "mixed"] {
            assert!(labels.contains(&format!("{}-{}", name, secs)));
        }
    }
    assert_eq!(summary.launched, 18);
    assert_eq!(summary.waves(), 9);
}

#[test]
fn deadlines_match_run_length() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        mode: Mode::PageTable,
        grace: Duration::from_secs(2),
        ..config(&dir, Phase::Efficient, 1, 1)
    };
    let driver = ExperimentDriver::new(&cfg, Recording::default());
    driver.execute();

    // 1s RUN + 2s GRACE FOR A SELF-TERMINATING WORKLOAD
    let budgets = driver.launcher().budgets.lock().unwrap();
    let left = budgets[0].unwrap();
    assert!(left > Duration::from_millis(2500) && left <= Duration::from_secs(3), "{:?}", left);
}

// === FAILURES AND ALTERNATION ===

#[test]
fn mixed_alternates_primary_first() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::Mixed, 5, 10);
    let driver = ExperimentDriver::new(&cfg, Recording::default());
    driver.execute();

    let counts = type_counts(&driver.store().records("mixed-1"));
    assert_eq!(counts.get("cpu"), Some(&3));
    assert_eq!(counts.get("io"), Some(&2));
}

#[test]
fn failed_runs_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::Mixed, 6, 4);
    let driver = ExperimentDriver::new(&cfg, Recording::failing(&["io"]));

    let summary = driver.execute();

    assert_eq!(summary.launched, 6);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 3);
    let records = driver.store().records("mixed-1");
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.get("type") == Some("cpu")));
}

// === OUTPUT AND SHUTDOWN ===

#[test]
fn cancel_mid_wave_stops_launching() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        max_time: 3,
        ..config(&dir, Phase::All, 10, 10)
    };
    let shutdown = CancelToken::new();
    let launcher = Recording {
        cancel_on_first: Some(shutdown.clone()),
        ..Recording::default()
    };
    let driver = ExperimentDriver::new(&cfg, launcher).with_shutdown(shutdown);

    let summary = driver.execute();

    // ONE WAVE AT MOST: THE SWEEP NEVER REACHES A SECOND EXPERIMENT
    assert!(summary.cancelled);
    assert_eq!(summary.waves(), 1);
    assert!(summary.launched >= 1);
    assert_eq!(summary.launched + summary.skipped, summary.wave_sizes[0]);
    assert_eq!(summary.launched, driver.launcher().calls.load(Ordering::SeqCst));
    assert_eq!(summary.failed, 0);
    assert_eq!(driver.store().len(), summary.launched);
    assert_eq!(driver.store().label_count(), 1);
}

// A LAUNCHER THAT REFUSES EVERY RUN AS ALREADY CANCELLED
struct Refusing;

impl Launcher for Refusing {
    fn launch(&self, _invocation: &Invocation, _deadline: &Deadline) -> Result<ResultRecord, RunError> {
        Err(RunError::Cancelled)
    }
}

#[test]
fn refused_runs_are_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::Cpu, 4, 2);
    let driver = ExperimentDriver::new(&cfg, Refusing);

    let summary = driver.execute();

    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.launched, 0);
    assert_eq!(summary.failed, 0);
    assert!(driver.store().is_empty());
}

#[test]
fn run_writes_named_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::Cpu, 3, 2);
    let driver = ExperimentDriver::new(&cfg, Recording::default());

    let summary = driver.run().unwrap();

    let expected = dir.path().join("procbench-io-cpu-max-1-step-1-procs-3-batch-2.json");
    assert_eq!(summary.output.as_deref(), Some(expected.as_path()));
    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&expected).unwrap()).unwrap();
    assert_eq!(v["cpu-only-1"].as_array().unwrap().len(), 3);
}

#[test]
fn cancelled_before_start_launches_nothing_but_writes() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, Phase::All, 10, 5);
    let shutdown = CancelToken::new();
    shutdown.cancel();
    let driver = ExperimentDriver::new(&cfg, Recording::default()).with_shutdown(shutdown);

    let summary = driver.run().unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.launched, 0);
    let path = summary.output.unwrap();
    let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(v, serde_json::json!({}));
}

#[test]
fn unwritable_output_dir_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        output_dir: dir.path().join("missing"),
        ..config(&dir, Phase::Cpu, 1, 1)
    };
    let driver = ExperimentDriver::new(&cfg, Recording::default());
    assert!(driver.run().is_err());
}

// === REAL BINARY ===

fn procbench_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_procbench"))
}

#[test]
fn real_sweep_collects_records() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        workload_exe: procbench_exe(),
        poll_interval: Duration::from_millis(50),
        ..config(&dir, Phase::Mixed, 2, 2)
    };
    let runner = ProcessRunner::new().poll_interval(cfg.poll_interval);
    let driver = ExperimentDriver::new(&cfg, runner);

    let summary = driver.run().unwrap();

    assert_eq!(summary.succeeded, 2, "{:?}", summary);
    let counts = type_counts(&driver.store().records("mixed-1"));
    assert_eq!(counts.get("cpu"), Some(&1));
    assert_eq!(counts.get("io"), Some(&1));
}
