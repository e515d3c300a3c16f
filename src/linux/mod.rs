pub mod daemon;
pub mod error;
pub mod external;
pub mod fork;
pub mod identity;
pub mod signal;
pub mod supervisor;
pub mod system;

pub use daemon::{Daemon, DaemonMain};
pub use error::{Error, Result};
pub use external::{DescriptorSpec, ExternalProcess, PipeByte};
pub use fork::{ChildFault, ForkTask, ForkWorker, TaskResult};
pub use identity::ProcessIdentity;
pub use signal::SignalTable;
pub use supervisor::{ChildId, ManagedProcess, NoHooks, Supervisor, SupervisorHooks};

use crate::config::Config;
use crate::process::{WaitOutcome, EXIT_FAILURE};
use log::{info, warn};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::cell::Cell;
use std::convert::TryFrom;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Summary of one supervised command run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pid: i32,
    /// Exit code, or 128 plus the signal number when killed by a signal.
    pub exit_code: i32,
    pub signal: Option<String>,
    pub wall_time_ms: u128,
    pub timed_out: bool,
}

impl RunReport {
    fn new(pid: i32, outcome: Option<WaitOutcome>, wall_time: Duration, timed_out: bool) -> Self {
        let signal = outcome.and_then(|outcome| outcome.signal());
        let exit_code = match (outcome.and_then(|outcome| outcome.exit_code()), signal) {
            (Some(code), _) => code,
            (None, Some(signo)) => signo + 128,
            (None, None) => EXIT_FAILURE,
        };

        RunReport {
            pid,
            exit_code,
            signal: signal.map(|signo| {
                Signal::try_from(signo)
                    .map(|signal| signal.as_str().to_string())
                    .unwrap_or_else(|_| signo.to_string())
            }),
            wall_time_ms: wall_time.as_millis(),
            timed_out,
        }
    }
}

/// Keeps the outcome of the last child that exited.
struct LastExit {
    outcome: Rc<Cell<Option<WaitOutcome>>>,
}

impl SupervisorHooks for LastExit {
    fn child_exited(&mut self, child: &dyn ManagedProcess) {
        self.outcome.set(child.supervisor().last_outcome());
    }

    fn child_start_failed(&mut self, child: &dyn ManagedProcess) {
        warn!("command {:?} failed to start", child.supervisor().configured_command());
    }
}

fn forward_signal(supervisor: &mut Supervisor, signal: Signal) {
    info!("forwarding {} to children", signal);
    supervisor.send_signal_to_children(signal);
}

/// Runs the configured external command under a supervisor of the current
/// process and waits for it.
///
/// SIGTERM and SIGINT received meanwhile are forwarded to the command. Once
/// the total timeout elapses the command is stopped.
pub fn run_command(config: &Config) -> Result<RunReport> {
    let outcome = Rc::new(Cell::new(None));
    let mut supervisor = Supervisor::current();
    supervisor.set_hooks(Box::new(LastExit {
        outcome: outcome.clone(),
    }));

    for &signal in [Signal::SIGTERM, Signal::SIGINT].iter() {
        supervisor.bind_signal_method(signal, forward_signal);
    }
    defer! {
        for &bound in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGCHLD].iter() {
            let _ = signal::restore_default(bound);
        }
    }

    let start_time = Instant::now();
    let command = ExternalProcess::from_config(config);
    let id = match supervisor.start_child(Box::new(command))? {
        Some(id) => id,
        None => {
            return Err(Error::SpawnFailed {
                command: config.process.command.clone().unwrap_or_default(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "command did not start"),
            })
        }
    };
    let pid = supervisor
        .child(id)
        .and_then(|child| child.pid())
        .map(|pid| pid.as_raw())
        .unwrap_or(0);

    let poll_interval = config.supervisor.poll_interval();
    let total_timeout = config.supervisor.total_timeout();
    let mut timed_out = false;

    while supervisor.has_children() {
        supervisor.dispatch_signals()?;
        supervisor.check_children_status();
        if !supervisor.has_children() {
            break;
        }

        if start_time.elapsed() > total_timeout {
            warn!("command {} still running after {:?}, stopping it", pid, total_timeout);
            timed_out = true;
            supervisor.stop_child(id)?;
            break;
        }
        std::thread::sleep(poll_interval);
    }

    Ok(RunReport::new(
        pid,
        outcome.get(),
        start_time.elapsed(),
        timed_out,
    ))
}

/// Runs the command and exits with its exit code after printing the report.
pub fn run(config: &Config) -> ! {
    match run_command(config) {
        Ok(report) => {
            match serde_json::to_string(&report) {
                Ok(json) => println!("{}", json),
                Err(err) => eprintln!("cannot encode run report: {}", err),
            }
            std::process::exit(report.exit_code)
        }
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(EXIT_FAILURE)
        }
    }
}

struct CommandDaemon<'a> {
    config: &'a Config,
}

impl DaemonMain for CommandDaemon<'_> {
    fn run(&mut self, process: &mut Supervisor) -> TaskResult {
        let report = run_command(self.config)?;
        info!("daemon command finished: {}", serde_json::to_string(&report)?);
        process.set_exit_code(report.exit_code);

        Ok(())
    }
}

/// Detaches, writes `pid_file` and runs the command in the daemon.
///
/// Returns only when the first fork fails.
pub fn run_daemon(config: &Config, pid_file: &Path) -> Result<()> {
    let mut daemon = Daemon::new(pid_file, &config.process, CommandDaemon { config });
    daemon.start().map(drop)
}
