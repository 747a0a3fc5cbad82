use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use procbench::parse::StatKind;

#[derive(Args)]
pub struct ParseArgs {
    // SAVED COPY OF A /proc/<pid>/ FILE, OR - FOR STDIN
    file: PathBuf,

    #[arg(long, value_enum)]
    kind: StatKind,
}

pub fn run(args: ParseArgs) -> Result<()> {
    let blob = if args.file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?
    };

    let values = args
        .kind
        .parse(&blob)
        .with_context(|| format!("{} is not a valid {} blob", args.file.display(), args.kind))?;
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}
