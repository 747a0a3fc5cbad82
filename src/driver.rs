// PROCBENCH EXPERIMENT DRIVER
// FOR EVERY DURATION IN THE SWEEP AND EVERY SELECTED EXPERIMENT, LAUNCH procs
// RUNNERS IN WAVES OF AT MOST batch. ONE OS THREAD PER RUNNER.
//
// WAVES, NOT A SLIDING WINDOW: AT EVERY INDEX DIVISIBLE BY batch THE DRIVER
// JOINS THE WHOLE CURRENT WAVE BEFORE LAUNCHING ANYTHING ELSE. NOTHING FROM
// WAVE N+1 STARTS UNTIL ALL OF WAVE N HAS FINISHED.
//
// A FAILED RUN IS LOGGED AND DROPPED. ONLY WRITING THE RESULT FILE CAN FAIL
// THE INVOCATION.
//
// SHUTDOWN IS CHECKED BEFORE EVERY SPAWN AND AGAIN BEFORE EVERY LAUNCH. ONCE IT
// IS CANCELLED NO NEW CHILD IS STARTED, EVEN HALFWAY THROUGH A WAVE.

use std::path::PathBuf;
use std::thread::ScopedJoinHandle;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::deadline::{CancelToken, Deadline};
use crate::experiment::{Experiment, RunConfig};
use crate::runner::{Invocation, ProcessRunner, RunError, Terminator};
use crate::store::{ResultRecord, ResultStore, StoreError};

// ANYTHING THAT CAN TURN AN INVOCATION INTO A RECORD
pub trait Launcher: Sync {
    fn launch(&self, invocation: &Invocation, deadline: &Deadline) -> Result<ResultRecord, RunError>;
}

impl<T: Terminator> Launcher for ProcessRunner<T> {
    fn launch(&self, invocation: &Invocation, deadline: &Deadline) -> Result<ResultRecord, RunError> {
        self.run_to_completion(invocation, deadline)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    // SIZE OF EVERY WAVE IN LAUNCH ORDER, ACROSS ALL BATCHES
    pub wave_sizes: Vec<usize>,
    pub launched: usize,
    pub succeeded: usize,
    pub failed: usize,
    // SPAWNED BUT NEVER LAUNCHED: SHUTDOWN ARRIVED FIRST
    pub skipped: usize,
    pub cancelled: bool,
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

impl RunSummary {
    pub fn waves(&self) -> usize {
        self.wave_sizes.len()
    }
}

pub struct ExperimentDriver<'a, L> {
    config: &'a RunConfig,
    launcher: L,
    store: ResultStore,
    shutdown: CancelToken,
}

impl<'a, L: Launcher> ExperimentDriver<'a, L> {
    pub fn new(config: &'a RunConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            store: ResultStore::new(),
            shutdown: CancelToken::new(),
        }
    }

    // CANCELLING THIS TOKEN STOPS NEW LAUNCHES AND EXPIRES EVERY RUNNING DEADLINE
    pub fn with_shutdown(mut self, shutdown: CancelToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    // THE WHOLE INVOCATION: SWEEP, THEN WRITE THE RESULT FILE
    pub fn run(&self) -> Result<RunSummary, DriverError> {
        let mut summary = self.execute();
        let path = self.config.output_path();
        self.store.serialize(&path)?;
        info!(
            "WROTE {} RECORDS UNDER {} LABELS TO {}",
            self.store.len(),
            self.store.label_count(),
            path.display()
        );
        summary.output = Some(path);
        Ok(summary)
    }

    // THE SWEEP ONLY. RESULTS STAY IN store().
    pub fn execute(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        let experiments = match self.config.experiments() {
            Ok(e) => e,
            Err(e) => {
                error!("{}", e);
                return summary;
            }
        };

        'sweep: for secs in self.config.durations() {
            for experiment in &experiments {
                if self.shutdown.is_cancelled() {
                    break 'sweep;
                }
                info!(
                    "RUNNING {} PROCS OF {} FOR {}S IN BATCHES OF {}",
                    self.config.procs, experiment.name, secs, self.config.batch
                );
                self.run_batch(experiment, secs, &mut summary);
            }
        }

        summary.cancelled = self.shutdown.is_cancelled();
        if summary.cancelled {
            warn!("INTERRUPTED -- KEEPING {} COMPLETED RUNS", summary.succeeded);
        }
        summary
    }

    fn run_batch(&self, experiment: &Experiment, secs: u64, summary: &mut RunSummary) {
        let label = experiment.label(secs);
        let batch = self.config.batch.max(1);

        std::thread::scope(|scope| {
            let mut wave: Vec<ScopedJoinHandle<'_, Outcome>> = Vec::with_capacity(batch);

            for index in 0..self.config.procs {
                if index % batch == 0 {
                    drain_wave(&mut wave, summary);
                }
                if self.shutdown.is_cancelled() {
                    debug!("{}: SHUTDOWN AT INDEX {}, NOTHING MORE LAUNCHED", label, index);
                    break;
                }
                if index % batch == 0 {
                    summary.wave_sizes.push(0);
                    debug!("{}: WAVE {} STARTING AT INDEX {}", label, summary.waves(), index);
                }

                let kind = experiment.workload_for(index);
                let (invocation, budget) = self.config.invocation(kind, secs);
                let label = label.as_str();
                wave.push(scope.spawn(move || {
                    // ABSOLUTE DEADLINE, FIXED WHEN THIS RUN STARTS
                    let deadline = Deadline::after(budget).linked_to(&self.shutdown);
                    self.run_one(label, &invocation, &deadline)
                }));

                if let Some(size) = summary.wave_sizes.last_mut() {
                    *size += 1;
                }
            }

            drain_wave(&mut wave, summary);
        });
    }

    fn run_one(&self, label: &str, invocation: &Invocation, deadline: &Deadline) -> Outcome {
        // A CHILD SIGNALLED BEFORE IT CAN CATCH SIGQUIT DIES INSTEAD OF REPORTING
        if self.shutdown.is_cancelled() {
            return Outcome::Skipped;
        }
        match self.launcher.launch(invocation, deadline) {
            Ok(record) => {
                self.store.insert(label, record);
                Outcome::Succeeded
            }
            Err(RunError::Cancelled) => Outcome::Skipped,
            Err(err) => {
                log_failure(label, &err);
                Outcome::Failed
            }
        }
    }
}

// COUNTED BARRIER: BLOCK UNTIL EVERY RUNNER OF THE WAVE HAS RETURNED
fn drain_wave(wave: &mut Vec<ScopedJoinHandle<'_, Outcome>>, summary: &mut RunSummary) {
    for handle in wave.drain(..) {
        match handle.join() {
            Ok(Outcome::Succeeded) => {
                summary.launched += 1;
                summary.succeeded += 1;
            }
            Ok(Outcome::Failed) => {
                summary.launched += 1;
                summary.failed += 1;
            }
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(_) => {
                error!("RUNNER THREAD PANICKED");
                summary.launched += 1;
                summary.failed += 1;
            }
        }
    }
}

fn log_failure(label: &str, err: &RunError) {
    warn!("{}: RUN DROPPED: {}", label, err);
    match err {
        RunError::MalformedOutput { output, .. } => debug!("{}: RAW OUTPUT:\n{}", label, output),
        RunError::ProcessFailed { stderr, .. } if !stderr.is_empty() => {
            debug!("{}: STDERR:\n{}", label, stderr)
        }
        _ => {}
    }
}
