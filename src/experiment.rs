// PROCBENCH EXPERIMENT CONFIGURATION
// WHAT ONE INVOCATION RUNS: THE DURATION SWEEP, THE EXPERIMENTS PER DURATION,
// HOW MANY PROCESSES PER EXPERIMENT AND HOW MANY AT ONCE.
//
// PURE DATA. READ-ONLY ONCE VALIDATED.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runner::{Invocation, DEFAULT_POLL_INTERVAL};
use crate::workload::{Contract, WorkloadKind};

// EXTRA TIME A SELF-TERMINATING WORKLOAD GETS BEFORE IT IS SIGNALLED ANYWAY
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    IoCpu,
    PageTable,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Self::IoCpu => "io-cpu",
            Self::PageTable => "page-table",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Phase {
    All,
    Cpu,
    Io,
    Efficient,
    Inefficient,
    Mixed,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Cpu => "cpu",
            Self::Io => "io",
            Self::Efficient => "efficient",
            Self::Inefficient => "inefficient",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ONE HOMOGENEOUS GROUP OF RUNS. WITH AN ALTERNATE, EVEN INDICES RUN THE
// PRIMARY AND ODD INDICES THE ALTERNATE (AN ODD procs FAVOURS THE PRIMARY).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Experiment {
    pub name: &'static str,
    pub primary: WorkloadKind,
    pub alternate: Option<WorkloadKind>,
}

impl Experiment {
    const fn single(name: &'static str, kind: WorkloadKind) -> Self {
        Self {
            name,
            primary: kind,
            alternate: None,
        }
    }

    const fn mixed(name: &'static str, a: WorkloadKind, b: WorkloadKind) -> Self {
        Self {
            name,
            primary: a,
            alternate: Some(b),
        }
    }

    pub fn label(&self, secs: u64) -> String {
        format!("{}-{}", self.name, secs)
    }

    pub fn workload_for(&self, index: usize) -> WorkloadKind {
        match self.alternate {
            Some(b) if index % 2 == 1 => b,
            _ => self.primary,
        }
    }
}

const CPU_ONLY: Experiment = Experiment::single("cpu-only", WorkloadKind::Cpu);
const IO_ONLY: Experiment = Experiment::single("io-only", WorkloadKind::Io);
const MIXED: Experiment = Experiment::mixed("mixed", WorkloadKind::Cpu, WorkloadKind::Io);
const EFFICIENT: Experiment =
    Experiment::single("efficient-page-table", WorkloadKind::EfficientMemory);
const INEFFICIENT: Experiment =
    Experiment::single("inefficient-page-table", WorkloadKind::InefficientMemory);
const MIXED_PAGE_TABLE: Experiment = Experiment::mixed(
    "mixed-page-table",
    WorkloadKind::EfficientMemory,
    WorkloadKind::InefficientMemory,
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("step must be at least 1 second")]
    ZeroStep,

    #[error("procs must be at least 1")]
    ZeroProcs,

    #[error("batch must be at least 1")]
    ZeroBatch,

    #[error("threads must be at least 1")]
    ZeroThreads,

    #[error("max-time ({max}s) is below step ({step}s); nothing would run")]
    MaxBelowStep { max: u64, step: u64 },

    #[error("phase '{phase}' is not part of the '{mode}' experiment")]
    PhaseNotInMode { phase: Phase, mode: Mode },
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub mode: Mode,
    pub phase: Phase,
    pub max_time: u64,
    pub step: u64,
    pub procs: usize,
    pub batch: usize,
    pub threads: usize,
    pub grace: Duration,
    pub poll_interval: Duration,
    pub workload_exe: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::IoCpu,
            phase: Phase::All,
            max_time: 5,
            step: 1,
            procs: 10,
            batch: 10,
            threads: 1,
            grace: DEFAULT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            workload_exe: PathBuf::from("procbench"),
            output_dir: PathBuf::from("."),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step == 0 {
            return Err(ConfigError::ZeroStep);
        }
        if self.procs == 0 {
            return Err(ConfigError::ZeroProcs);
        }
        if self.batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.max_time < self.step {
            return Err(ConfigError::MaxBelowStep {
                max: self.max_time,
                step: self.step,
            });
        }
        self.experiments().map(drop)
    }

    // step, 2*step, ... UP TO AND INCLUDING max_time
    pub fn durations(&self) -> Vec<u64> {
        if self.step == 0 {
            return Vec::new();
        }
        // i * step <= max_time FOR EVERY i IN RANGE, SO NOTHING CAN OVERFLOW
        (1..=self.max_time / self.step).map(|i| i * self.step).collect()
    }

    pub fn experiments(&self) -> Result<Vec<Experiment>, ConfigError> {
        let bad_phase = || ConfigError::PhaseNotInMode {
            phase: self.phase,
            mode: self.mode,
        };
        match (self.mode, self.phase) {
            (Mode::IoCpu, Phase::All) => Ok(vec![CPU_ONLY, IO_ONLY, MIXED]),
            (Mode::IoCpu, Phase::Cpu) => Ok(vec![CPU_ONLY]),
            (Mode::IoCpu, Phase::Io) => Ok(vec![IO_ONLY]),
            (Mode::IoCpu, Phase::Mixed) => Ok(vec![MIXED]),
            (Mode::IoCpu, _) => Err(bad_phase()),
            (Mode::PageTable, Phase::All) => Ok(vec![EFFICIENT, INEFFICIENT, MIXED_PAGE_TABLE]),
            (Mode::PageTable, Phase::Efficient) => Ok(vec![EFFICIENT]),
            (Mode::PageTable, Phase::Inefficient) => Ok(vec![INEFFICIENT]),
            (Mode::PageTable, Phase::Mixed) => Ok(vec![MIXED_PAGE_TABLE]),
            (Mode::PageTable, _) => Err(bad_phase()),
        }
    }

    // ENCODES EVERY SWEEP PARAMETER SO DIFFERENT SWEEPS NEVER OVERWRITE EACH OTHER
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "procbench-{}-max-{}-step-{}-procs-{}-batch-{}.json",
            self.mode, self.max_time, self.step, self.procs, self.batch
        ))
    }

    // THE COMMAND LINE FOR ONE RUN AND HOW LONG THE RUNNER LETS IT LIVE
    pub fn invocation(&self, kind: WorkloadKind, secs: u64) -> (Invocation, Duration) {
        let mut args = vec![
            "workload".to_string(),
            kind.name().to_string(),
            "--format".to_string(),
            "raw".to_string(),
        ];
        let run_time = Duration::from_secs(secs);
        let budget = match kind.contract() {
            Contract::SignalTerminated => {
                args.push("--threads".to_string());
                args.push(self.threads.to_string());
                run_time
            }
            Contract::SelfTerminating => {
                args.push("--time".to_string());
                args.push(secs.to_string());
                run_time + self.grace
            }
        };

        let invocation = Invocation {
            program: self.workload_exe.clone(),
            args,
            layout: kind.layout(),
            variant: kind.name().to_string(),
        };
        (invocation, budget)
    }
}
