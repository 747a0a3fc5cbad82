use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use log::info;

use procbench::deadline::CancelToken;
use procbench::driver::ExperimentDriver;
use procbench::experiment::{Mode, Phase, RunConfig};
use procbench::runner::ProcessRunner;
use procbench::store::Snapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunFormat {
    // WRITE THE JSON FILE ONLY
    Json,
    // ALSO PRINT EVERY RECORD TO STDOUT
    Print,
}

#[derive(Args)]
pub struct RunArgs {
    // WHICH EXPERIMENT FAMILY TO RUN
    #[arg(long, value_enum, default_value_t = Mode::IoCpu)]
    mode: Mode,

    // WHICH PHASES OF THE FAMILY TO RUN
    #[arg(long, value_enum, default_value_t = Phase::All)]
    phases: Phase,

    // LONGEST RUN DURATION IN SECONDS
    #[arg(long, default_value_t = 5)]
    max_time: u64,

    // FIRST DURATION AND INCREMENT, IN SECONDS
    #[arg(long, default_value_t = 1)]
    step: u64,

    // PROCESSES PER EXPERIMENT PER DURATION
    #[arg(long, default_value_t = 10)]
    procs: usize,

    // MAXIMUM PROCESSES ALIVE AT ONCE
    #[arg(long, default_value_t = 10)]
    batch: usize,

    // THREADS PER cpu/io WORKLOAD
    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[arg(long, value_enum, default_value_t = RunFormat::Json)]
    format: RunFormat,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    // DEADLINE POLL INTERVAL IN MILLISECONDS
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,

    // EXTRA SECONDS A SELF-TERMINATING WORKLOAD GETS BEFORE IT IS SIGNALLED
    #[arg(long, default_value_t = 5)]
    grace: u64,

    // WORKLOAD BINARY (DEFAULT: THIS EXECUTABLE)
    #[arg(long)]
    workload_exe: Option<PathBuf>,

    // -v DEBUG, -vv TRACE
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl RunArgs {
    fn into_config(self) -> Result<RunConfig> {
        let workload_exe = match self.workload_exe {
            Some(path) => path,
            None => std::env::current_exe().context("cannot locate own executable")?,
        };
        Ok(RunConfig {
            mode: self.mode,
            phase: self.phases,
            max_time: self.max_time,
            step: self.step,
            procs: self.procs,
            batch: self.batch,
            threads: self.threads,
            grace: Duration::from_secs(self.grace),
            poll_interval: Duration::from_millis(self.poll_ms),
            workload_exe,
            output_dir: self.output_dir,
        })
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    super::init_logger(args.verbose)?;
    let format = args.format;
    let config = args.into_config()?;
    config.validate().context("invalid run configuration")?;

    let shutdown = CancelToken::new();
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    info!("PROCBENCH v{}", env!("CARGO_PKG_VERSION"));
    info!("MODE:       {} ({})", config.mode, config.phase);
    info!("SWEEP:      {:?} SECONDS", config.durations());
    info!("PROCS:      {} (BATCH {})", config.procs, config.batch);
    info!("WORKLOAD:   {}", config.workload_exe.display());

    let runner = ProcessRunner::new().poll_interval(config.poll_interval);
    let driver = ExperimentDriver::new(&config, runner).with_shutdown(shutdown);
    let summary = driver.run()?;

    info!(
        "DONE: {} LAUNCHED, {} OK, {} FAILED, {} SKIPPED, {} WAVES",
        summary.launched,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.waves()
    );

    if format == RunFormat::Print {
        print_snapshot(&driver.store().snapshot());
    }
    if let Some(path) = summary.output {
        println!("Wrote results to {}", path.display());
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    for (label, records) in snapshot {
        println!("{}", label);
        println!("{}", "=".repeat(60));
        for (i, record) in records.iter().enumerate() {
            println!("  RUN {}", i);
            for (key, value) in record.iter() {
                println!("    {:<40} {}", key, value);
            }
        }
        println!();
    }
}
