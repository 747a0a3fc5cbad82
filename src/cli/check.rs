use std::io::Read;
use std::path::Path;

use anyhow::Result;
use regex::Regex;

use procbench::parse::StatKind;

// KERNEL OPTIONS BEHIND /proc/<pid>/schedstat AND /proc/<pid>/sched
const REQUIRED_OPTIONS: [&str; 2] = ["CONFIG_SCHEDSTATS", "CONFIG_SCHED_DEBUG"];

// OPTIONS FROM required THAT ARE NOT SET TO y IN config
fn missing_options<'a>(config: &str, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|opt| {
            let pattern = format!(r"(?m)^{}=y\s*$", regex::escape(opt));
            match Regex::new(&pattern) {
                Ok(re) => !re.is_match(config),
                Err(_) => true,
            }
        })
        .copied()
        .collect()
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }

    let missing = missing_options(&config, &REQUIRED_OPTIONS);
    for opt in REQUIRED_OPTIONS {
        if missing.contains(&opt) {
            println!("  {:<22}NOT SET -- statistics may be incomplete", opt);
        } else {
            println!("  {:<22}OK", opt);
        }
    }
    missing.is_empty()
}

fn check_proc_files() -> bool {
    let mut ok = true;
    for kind in [
        StatKind::Schedstat,
        StatKind::Stat,
        StatKind::Sched,
        StatKind::Statm,
        StatKind::Status,
    ] {
        let path = format!("/proc/self/{}", kind.file_name());
        if Path::new(&path).exists() {
            println!("  {:<22}OK", path);
        } else {
            println!("  {:<22}MISSING", path);
            ok = false;
        }
    }
    ok
}

pub fn run_check() -> Result<()> {
    println!("PROCBENCH KERNEL CHECK");
    println!();

    let mut ok = true;

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("PROC FILES:");
    if !check_proc_files() {
        ok = false;
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        println!("  Rebuild the kernel with CONFIG_SCHEDSTATS=y and CONFIG_SCHED_DEBUG=y");
        std::process::exit(1);
    }

    Ok(())
}
