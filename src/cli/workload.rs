use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use procbench::workload::{self, Contract, OutputFormat, WorkloadKind, WorkloadOptions, DEFAULT_MESSAGE};

// SELF-TERMINATING WORKLOADS NEED AN END
const DEFAULT_MEMORY_SECS: u64 = 10;

#[derive(Args)]
pub struct WorkloadArgs {
    #[arg(value_enum)]
    kind: WorkloadKind,

    // RUN FOR THIS MANY SECONDS. cpu/io OTHERWISE RUN UNTIL SIGQUIT.
    #[arg(long)]
    time: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Raw)]
    format: OutputFormat,

    // PARALLEL BODIES FOR cpu/io
    #[arg(long, default_value_t = 1)]
    threads: usize,

    // MESSAGE LAID OUT BY THE MEMORY WORKLOADS
    #[arg(long, default_value = DEFAULT_MESSAGE)]
    input: String,
}

impl WorkloadArgs {
    fn options(&self) -> WorkloadOptions {
        let time = match (self.time, self.kind.contract()) {
            (Some(secs), _) => Some(Duration::from_secs(secs)),
            (None, Contract::SelfTerminating) => Some(Duration::from_secs(DEFAULT_MEMORY_SECS)),
            (None, Contract::SignalTerminated) => None,
        };
        WorkloadOptions {
            time,
            threads: self.threads.max(1),
            message: self.input.clone(),
            format: self.format,
        }
    }
}

pub fn run(args: WorkloadArgs) -> Result<()> {
    let out = workload::run(args.kind, &args.options())
        .with_context(|| format!("{} workload failed", args.kind.name()))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(out.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
