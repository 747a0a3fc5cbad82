// PROCBENCH WORKLOADS
// THE PROCESSES BEING MEASURED. EACH BODY BURNS ONE RESOURCE IN A FIXED
// PATTERN UNTIL TOLD TO STOP, THEN THE PROCESS DUMPS ITS OWN /proc/self
// STATISTICS TO STDOUT AND EXITS ZERO.
//
// TWO CONTRACTS:
//   SIGNAL-TERMINATED (cpu, io): LOOP UNTIL SIGQUIT (OR AN OPTIONAL --time).
//     THE DRIVER SENDS SIGQUIT AT THE RUN DEADLINE.
//   SELF-TERMINATING (efficient-memory, inefficient-memory): LOOP UNTIL --time
//     EXPIRES. THE DRIVER ONLY WAITS.
//
// THE SIGQUIT HANDLER ONLY SETS AN ATOMIC. ALL OUTPUT HAPPENS ON THE MAIN
// THREAD AFTER THE BODY RETURNS.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::deadline::Deadline;
use crate::parse::{ParseError, StatKind, StatsLayout, SEGMENT_DELIMITER};

// ONE BYTE PER PAGE IN THE INEFFICIENT LAYOUT
pub const PAGE_JUMP: usize = 4096;

pub const DEFAULT_MESSAGE: &str = "deadbeef";

// HOW FAR PAST EOF THE io BODY SEEKS EACH ITERATION. NOTHING IS WRITTEN THERE.
const IO_SEEK_PAST_END: i64 = 20 * 1024 * 1024;

static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum WorkloadKind {
    Cpu,
    Io,
    EfficientMemory,
    InefficientMemory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Contract {
    SignalTerminated,
    SelfTerminating,
}

impl WorkloadKind {
    // CLI NAME, ALSO STORED AS THE "type" FIELD OF EVERY RECORD
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Io => "io",
            Self::EfficientMemory => "efficient-memory",
            Self::InefficientMemory => "inefficient-memory",
        }
    }

    pub fn layout(self) -> StatsLayout {
        match self {
            Self::Cpu | Self::Io => StatsLayout::Scheduler,
            Self::EfficientMemory | Self::InefficientMemory => StatsLayout::Memory,
        }
    }

    pub fn contract(self) -> Contract {
        match self {
            Self::Cpu | Self::Io => Contract::SignalTerminated,
            Self::EfficientMemory | Self::InefficientMemory => Contract::SelfTerminating,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    // DELIMITED KERNEL BLOBS, CONSUMED BY THE DRIVER
    Raw,
    Json,
    Print,
}

#[derive(Clone, Debug)]
pub struct WorkloadOptions {
    pub time: Option<Duration>,
    pub threads: usize,
    pub message: String,
    pub format: OutputFormat,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            time: None,
            threads: 1,
            message: DEFAULT_MESSAGE.to_string(),
            format: OutputFormat::Raw,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse own statistics: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to encode statistics: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to install SIGQUIT handler: {0}")]
    Signal(io::Error),

    #[error("workload thread panicked")]
    Panicked,
}

// ---------------------------------------------------------------------------
// QUIT SIGNAL
// ---------------------------------------------------------------------------

extern "C" fn on_quit(_sig: libc::c_int) {
    QUIT_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn install_quit_handler() -> io::Result<()> {
    let handler = on_quit as extern "C" fn(libc::c_int) as libc::sighandler_t;
    let prev = unsafe { libc::signal(libc::SIGQUIT, handler) };
    if prev == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn quit_requested() -> bool {
    QUIT_REQUESTED.load(Ordering::SeqCst)
}

// ---------------------------------------------------------------------------
// BODIES
// ---------------------------------------------------------------------------

// k-TH TERM OF THE LEIBNIZ SERIES FOR PI
fn leibniz_term(k: u64) -> f64 {
    let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
    4.0 * sign / (2 * k + 1) as f64
}

// PURE FLOATING POINT SPIN. RETURNS THE PARTIAL SUM SO IT CANNOT BE ELIDED.
pub fn cpu_intensive<S: Fn() -> bool>(stop: S) -> f64 {
    let mut pi = 0.0f64;
    let mut k: u64 = 0;
    loop {
        pi += leibniz_term(k);
        k += 1;
        if stop() {
            break;
        }
    }
    std::hint::black_box(pi)
}

// SAME SERIES, BUT EVERY STEP HITS THE DISK: APPEND THE CURRENT VALUE, fsync,
// READ IT BACK, SEEK FAR PAST EOF, THEN COPY 8 BYTES AT A PSEUDO-RANDOM OFFSET
// ONTO THEMSELVES AND fsync AGAIN. RETURNS THE ITERATION COUNT.
pub fn io_intensive<S: Fn() -> bool>(stop: S) -> io::Result<u64> {
    let mut file = tempfile::tempfile()?;
    let mut pi = 0.0f64;
    let mut k: u64 = 0;
    let mut scratch = [0u8; 8];
    let mut x: u64 = std::process::id() as u64 | 1;

    loop {
        pi += leibniz_term(k);
        k += 1;

        file.seek(SeekFrom::End(0))?;
        file.write_all(&pi.to_be_bytes())?;
        file.sync_data()?;

        file.seek(SeekFrom::End(-(scratch.len() as i64)))?;
        file.read_exact(&mut scratch)?;
        file.seek(SeekFrom::End(IO_SEEK_PAST_END))?;

        let len = file.metadata()?.len();
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
        let offset = (x >> 33) % len;
        file.seek(SeekFrom::Start(offset))?;
        let n = file.read(&mut scratch)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&scratch[..n])?;
        file.sync_data()?;

        if stop() {
            break;
        }
    }
    std::hint::black_box(pi);
    Ok(k)
}

// PLACE message INTO A FRESH BUFFER, stride BYTES BETWEEN CONSECUTIVE BYTES.
// stride 1 IS CONTIGUOUS; stride PAGE_JUMP PUTS EVERY BYTE ON ITS OWN PAGE.
pub fn layout_buffer(message: &[u8], stride: usize) -> Vec<u8> {
    let stride = stride.max(1);
    let mut buf = vec![0u8; message.len() + (stride - 1) * message.len()];
    write_strided(&mut buf, message, stride);
    buf
}

fn write_strided(buf: &mut [u8], message: &[u8], stride: usize) {
    for (i, byte) in message.iter().enumerate() {
        buf[i * stride] = *byte;
    }
}

// KEEP REWRITING THE MESSAGE UNTIL stop. RETURNS THE NUMBER OF PASSES.
pub fn memory_intensive<S: Fn() -> bool>(message: &[u8], stride: usize, stop: S) -> u64 {
    let stride = stride.max(1);
    let mut buf = layout_buffer(message, stride);
    let mut passes: u64 = 1;
    while !stop() {
        write_strided(&mut buf, message, stride);
        std::hint::black_box(&mut buf);
        passes += 1;
    }
    passes
}

// ---------------------------------------------------------------------------
// STATISTICS OUTPUT
// ---------------------------------------------------------------------------

pub fn read_proc_self(kind: StatKind) -> io::Result<String> {
    fs::read_to_string(format!("/proc/self/{}", kind.file_name()))
}

// ALL BLOBS OF A LAYOUT, JOINED WITH THE SEGMENT DELIMITER
pub fn collect_raw(layout: StatsLayout) -> io::Result<String> {
    let blobs = layout
        .kinds()
        .iter()
        .map(|kind| read_proc_self(*kind))
        .collect::<io::Result<Vec<String>>>()?;
    Ok(blobs.join(SEGMENT_DELIMITER))
}

pub fn render(kind: WorkloadKind, raw: &str, format: OutputFormat) -> Result<String, WorkloadError> {
    if format == OutputFormat::Raw {
        return Ok(raw.to_string());
    }

    let mut values = kind.layout().parse_output(raw)?;
    values.insert("type".to_string(), kind.name().to_string());
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&values)? + "\n"),
        _ => Ok(values
            .iter()
            .map(|(k, v)| format!("{}\n{}\n", k, v))
            .collect()),
    }
}

// ---------------------------------------------------------------------------
// ENTRY
// ---------------------------------------------------------------------------

// threads BODIES IN TOTAL, ONE OF THEM ON THE CALLING THREAD.
// /proc/self/{schedstat,sched} DESCRIBE ONLY THE THREAD-GROUP LEADER, SO THE
// LEADER MUST BE DOING THE WORK, NOT PARKED IN join.
fn run_threads<F>(threads: usize, body: F) -> Result<(), WorkloadError>
where
    F: Fn() -> Result<(), WorkloadError> + Sync,
{
    std::thread::scope(|s| {
        let extra: Vec<_> = (1..threads.max(1)).map(|_| s.spawn(&body)).collect();
        let leader = body();
        extra
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(WorkloadError::Panicked)))
            .collect::<Result<Vec<()>, WorkloadError>>()?;
        leader
    })
}

// RUN ONE WORKLOAD TO COMPLETION AND RETURN WHAT IT SHOULD PRINT
pub fn run(kind: WorkloadKind, opts: &WorkloadOptions) -> Result<String, WorkloadError> {
    install_quit_handler().map_err(WorkloadError::Signal)?;

    let deadline = opts.time.map_or_else(Deadline::never, Deadline::after);
    let stop = || deadline.is_done() || quit_requested();
    let message = opts.message.as_bytes();

    match kind {
        WorkloadKind::Cpu => run_threads(opts.threads, || {
            cpu_intensive(stop);
            Ok(())
        })?,
        WorkloadKind::Io => run_threads(opts.threads, || {
            io_intensive(stop)?;
            Ok(())
        })?,
        WorkloadKind::EfficientMemory => {
            memory_intensive(message, 1, stop);
        }
        WorkloadKind::InefficientMemory => {
            memory_intensive(message, PAGE_JUMP, stop);
        }
    }

    let raw = collect_raw(kind.layout())?;
    render(kind, &raw, opts.format)
}
