// PROCBENCH PROCESS RUNNER
// ONE CHILD, START TO FINISH:
//   LAUNCHED -> RUNNING -> { NATURAL EXIT | SIGNALED -> WAITING -> TERMINATED }
//            -> PARSED | FAILED
//
// THE RUNNER POLLS TWO THINGS EVERY INTERVAL: HAS THE CHILD EXITED ON ITS OWN,
// AND HAS THE DEADLINE PASSED. ON EXPIRY IT SENDS SIGQUIT EXACTLY ONCE AND
// WAITS. A CHILD THAT EXITS BETWEEN THE CHECK AND THE SIGNAL IS NOT AN ERROR.
//
// CHILDREN GET THEIR OWN PROCESS GROUP SO A TERMINAL CTRL+C REACHES ONLY THE
// DRIVER, WHICH THEN STOPS THEM THROUGH THE NORMAL DEADLINE PATH.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::deadline::Deadline;
use crate::parse::{ParseError, StatsLayout};
use crate::store::ResultRecord;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// WHAT TO EXECUTE AND HOW TO READ ITS OUTPUT
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub layout: StatsLayout,
    // STORED AS "type" IN THE RECORD
    pub variant: String,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to terminate pid {pid}: {source}")]
    Termination {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("pid {pid} did not exit cleanly: {status}")]
    ProcessFailed {
        pid: u32,
        status: ExitStatus,
        stderr: String,
    },

    #[error("deadline already passed; not launched")]
    Cancelled,

    #[error("malformed output from pid {pid}: {source}")]
    MalformedOutput {
        pid: u32,
        #[source]
        source: ParseError,
        output: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminateOutcome {
    AlreadyExited,
    Terminated,
}

// HOW A RUNNER FORCES A CHILD TO STOP
pub trait Terminator: Send + Sync {
    fn terminate(&self, child: &mut Child) -> io::Result<TerminateOutcome>;
}

// SIGQUIT: THE WORKLOAD CATCHES IT, DUMPS ITS STATISTICS AND EXITS ZERO
#[derive(Clone, Copy, Debug, Default)]
pub struct SigQuit;

impl Terminator for SigQuit {
    fn terminate(&self, child: &mut Child) -> io::Result<TerminateOutcome> {
        // REAPED CHILDREN MUST NOT BE SIGNALLED: THE PID MAY BE REUSED
        if child.try_wait()?.is_some() {
            return Ok(TerminateOutcome::AlreadyExited);
        }
        let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGQUIT) };
        if rc == 0 {
            return Ok(TerminateOutcome::Terminated);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(TerminateOutcome::AlreadyExited)
        } else {
            Err(err)
        }
    }
}

pub struct ProcessRunner<T = SigQuit> {
    poll_interval: Duration,
    terminator: T,
}

impl ProcessRunner<SigQuit> {
    pub fn new() -> Self {
        Self::with_terminator(SigQuit)
    }
}

impl Default for ProcessRunner<SigQuit> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Terminator> ProcessRunner<T> {
    pub fn with_terminator(terminator: T) -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            terminator,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn terminator(&self) -> &T {
        &self.terminator
    }

    pub fn run_to_completion(
        &self,
        invocation: &Invocation,
        deadline: &Deadline,
    ) -> Result<ResultRecord, RunError> {
        // A CHILD SIGNALLED BEFORE IT INSTALLS ITS HANDLER DUMPS CORE
        if deadline.is_done() {
            return Err(RunError::Cancelled);
        }

        // LAUNCHED
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunError::Launch {
                program: invocation.program.clone(),
                source,
            })?;
        let pid = child.id();
        debug!("LAUNCHED {} (PID {})", invocation.variant, pid);

        // RUNNING
        self.supervise(&mut child, deadline)?;

        // TERMINATED: DRAIN PIPES AND COLLECT STATUS
        let output = child
            .wait_with_output()
            .map_err(|source| RunError::Termination { pid, source })?;

        if !output.status.success() {
            return Err(RunError::ProcessFailed {
                pid,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        // PARSED
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut values = invocation
            .layout
            .parse_output(&stdout)
            .map_err(|source| RunError::MalformedOutput {
                pid,
                source,
                output: stdout.to_string(),
            })?;
        values.insert("type".to_string(), invocation.variant.clone());
        Ok(ResultRecord::from(values))
    }

    // RETURNS ONCE THE CHILD HAS EXITED ON ITS OWN OR HAS BEEN SIGNALLED
    fn supervise(&self, child: &mut Child, deadline: &Deadline) -> Result<(), RunError> {
        let pid = child.id();
        loop {
            let exited = child
                .try_wait()
                .map_err(|source| RunError::Termination { pid, source })?;
            if exited.is_some() {
                debug!("PID {} EXITED BEFORE ITS DEADLINE", pid);
                return Ok(());
            }

            if deadline.is_done() {
                return match self.terminator.terminate(child) {
                    Ok(TerminateOutcome::Terminated) => {
                        debug!("PID {} SIGNALLED AT DEADLINE", pid);
                        Ok(())
                    }
                    Ok(TerminateOutcome::AlreadyExited) => {
                        debug!("PID {} EXITED BEFORE THE SIGNAL LANDED", pid);
                        Ok(())
                    }
                    Err(source) => {
                        // NEVER LEAVE A RUNAWAY CHILD BEHIND
                        let _ = child.kill();
                        let _ = child.wait();
                        Err(RunError::Termination { pid, source })
                    }
                };
            }

            // WAKE AT THE DEADLINE RATHER THAN UP TO ONE INTERVAL PAST IT
            let nap = deadline
                .remaining()
                .map_or(self.poll_interval, |left| left.min(self.poll_interval));
            std::thread::sleep(nap);
        }
    }
}
