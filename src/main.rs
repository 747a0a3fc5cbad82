// PROCBENCH -- SCHEDULER AND MEMORY BEHAVIOR BENCHMARK
// ONE BINARY, TWO ROLES:
//   run       THE DRIVER. SPAWNS THIS SAME BINARY AS WORKLOADS, IN WAVES.
//   workload  ONE MEASURED PROCESS. PRINTS ITS OWN /proc STATISTICS ON EXIT.
// PLUS check (KERNEL SUPPORT) AND parse (OFFLINE BLOB INSPECTION).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "procbench")]
#[command(about = "PROCBENCH -- SCHEDULING AND MEMORY STATISTICS ACROSS WAVES OF WORKLOADS")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // SWEEP RUN DURATIONS AND COLLECT STATISTICS FROM EVERY WORKLOAD
    Run(cli::run::RunArgs),

    // RUN A SINGLE WORKLOAD AND PRINT ITS STATISTICS
    Workload(cli::workload::WorkloadArgs),

    // VERIFY THE KERNEL EXPOSES THE STATISTICS WE READ
    Check,

    // PARSE A SAVED /proc BLOB AND PRINT IT AS JSON
    Parse(cli::parse::ParseArgs),
}

fn main() -> Result<()> {
    // A WORKLOAD MAY BE SIGNALLED THE MOMENT IT IS SPAWNED. CATCH SIGQUIT
    // BEFORE ARGUMENT PARSING SO AN EARLY QUIT ENDS THE RUN INSTEAD OF
    // KILLING THE PROCESS.
    if std::env::args_os().nth(1).is_some_and(|arg| arg == "workload") {
        procbench::workload::install_quit_handler()?;
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cli::run::run(args),
        Command::Workload(args) => cli::workload::run(args),
        Command::Check => cli::check::run_check(),
        Command::Parse(args) => cli::parse::run(args),
    }
}
