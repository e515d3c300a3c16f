use super::error::{Error, Result};
use super::signal;
use super::supervisor::{ManagedProcess, Supervisor};
use super::system::current_pid;
use crate::config::ProcessOptions;
use crate::process::{EXIT_FAILURE, EXIT_SUCCESS};
use log::{debug, error};
use nix::unistd::{fork, ForkResult};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Result of code running in a forked child or a daemon.
pub type TaskResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// A fault that escaped the code of a child branch.
#[derive(Debug)]
pub enum ChildFault {
    Failed(Box<dyn std::error::Error>),
    Panicked(String),
}

impl fmt::Display for ChildFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildFault::Failed(err) => write!(f, "{}", err),
            ChildFault::Panicked(message) => write!(f, "panicked: {}", message),
        }
    }
}

/// Runs `body`, catching both errors and panics.
pub(crate) fn contain<F>(body: F) -> Option<ChildFault>
where
    F: FnOnce() -> TaskResult,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(ChildFault::Failed(err)),
        Err(payload) => Some(ChildFault::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

/// Converts a contained fault into a failure exit code.
pub(crate) fn fail_exit_code(process: &mut Supervisor) {
    if process.exit_code() == EXIT_SUCCESS {
        process.set_exit_code(EXIT_FAILURE);
    }
}

/// Ends a child branch. Control never returns to the caller's stack.
pub(crate) fn terminate(process: &Supervisor) -> ! {
    std::process::exit(process.exit_code())
}

/// Code run on both sides of a fork.
pub trait ForkTask {
    /// Runs once in the parent and once in the child, right after the fork.
    fn common(&mut self, _process: &mut Supervisor) {}

    /// Runs in the parent after `common`.
    fn parent(&mut self, _process: &mut Supervisor) {}

    /// Runs in the child after `common`. The child exits with the exit code
    /// of `process` when this returns.
    fn child(&mut self, process: &mut Supervisor) -> TaskResult;

    /// Reports a fault that escaped `common` or `child` in the child. The
    /// child then exits with a failure code.
    fn fatal(&mut self, process: &mut Supervisor, fault: &ChildFault) {
        error!("process {} failed: {}", process.identity().raw_pid(), fault);
    }
}

/// A process created by forking the current one.
///
/// The pid is known once [`start`](ForkWorker::start) returns in the parent.
/// The child side never returns from `start`: it always exits the process.
pub struct ForkWorker<T> {
    process: Supervisor,
    task: T,
}

impl<T: ForkTask> ForkWorker<T> {
    /// A worker without parent link. It must be started through
    /// [`Supervisor::start_child`], which links it.
    pub fn new(options: &ProcessOptions, task: T) -> ForkWorker<T> {
        ForkWorker {
            process: Supervisor::new(options),
            task,
        }
    }

    pub fn with_parent(parent: &Supervisor, options: &ProcessOptions, task: T) -> ForkWorker<T> {
        let mut worker = ForkWorker::new(options, task);
        parent.child_inheritance(&mut worker.process);
        worker
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    /// Forks the current process.
    ///
    /// Returns `Ok(false)` without a parent link, and `Ok(true)` without
    /// forking when the worker is already running.
    pub fn start(&mut self) -> Result<bool> {
        // signal inheritance needs a source
        if self.process.parent().is_none() {
            return Ok(false);
        }
        if self.process.is_current() || self.process.exists() {
            return Ok(true);
        }

        match unsafe { fork() }.map_err(|source| Error::ForkFailed {
            call: "fork",
            source,
        })? {
            ForkResult::Parent { child } => {
                debug!("forked child {}", child);
                self.process.assign_pid(child);
                self.task.common(&mut self.process);
                self.task.parent(&mut self.process);
                Ok(true)
            }
            ForkResult::Child => self.run_child(),
        }
    }

    fn run_child(&mut self) -> ! {
        signal::clear_pending();
        self.process.assign_pid(current_pid());
        self.process.set_exit_code(EXIT_SUCCESS);

        let task = &mut self.task;
        let process = &mut self.process;
        let fault = contain(|| {
            task.common(process);
            task.child(process)
        });

        if let Some(fault) = fault {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| task.fatal(process, &fault)));
            fail_exit_code(process);
        }

        terminate(process)
    }
}

impl<T: ForkTask + 'static> ManagedProcess for ForkWorker<T> {
    fn supervisor(&self) -> &Supervisor {
        &self.process
    }

    fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.process
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn start(&mut self) -> Result<bool> {
        ForkWorker::start(self)
    }
}
