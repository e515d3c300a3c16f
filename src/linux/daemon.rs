use super::error::{Error, Result};
use super::fork::{contain, fail_exit_code, terminate, ChildFault, TaskResult};
use super::signal;
use super::supervisor::{ManagedProcess, Supervisor};
use super::system::{current_pid, redirect_std_to_null};
use crate::config::ProcessOptions;
use crate::process::EXIT_SUCCESS;
use log::{error, info};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, fork, setsid, ForkResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// The main loop of a daemon.
pub trait DaemonMain {
    /// Runs detached from the terminal. The daemon exits with the exit code
    /// of `process` when this returns.
    fn run(&mut self, process: &mut Supervisor) -> TaskResult;

    /// Reports a failure after the daemon left the caller's process. The
    /// daemon then exits with a failure code.
    fn fatal(&mut self, process: &mut Supervisor, fault: &ChildFault) {
        error!("daemon {} failed: {}", process.identity().raw_pid(), fault);
    }
}

pub struct Daemon<M> {
    process: Supervisor,
    pid_file: PathBuf,
    main: M,
}

impl<M: DaemonMain> Daemon<M> {
    pub fn new<P: AsRef<Path>>(pid_file: P, options: &ProcessOptions, main: M) -> Daemon<M> {
        Daemon {
            process: Supervisor::new(options),
            pid_file: pid_file.as_ref().to_path_buf(),
            main,
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn main(&self) -> &M {
        &self.main
    }

    /// Detaches into a daemon with the classic double fork.
    ///
    /// Only a failure of the first fork is returned. Every process past that
    /// point exits instead of returning: the intermediate parents with 0, the
    /// daemon with its exit code once the main loop is done.
    pub fn start(&mut self) -> Result<bool> {
        if let ForkResult::Parent { .. } = fork_or_fail()? {
            std::process::exit(EXIT_SUCCESS);
        }

        signal::clear_pending();
        let main = &mut self.main;
        let process = &mut self.process;
        let pid_file = &self.pid_file;

        let fault = contain(|| {
            detach()?;
            process.assign_pid(current_pid());
            process.set_exit_code(EXIT_SUCCESS);
            write_pid_file(pid_file, process)?;
            info!("daemon started (pid {})", process.identity().raw_pid());

            umask(Mode::empty());
            chdir("/")?;
            redirect_std_to_null()?;

            main.run(process)
        });

        if let Some(fault) = fault {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| main.fatal(process, &fault)));
            fail_exit_code(process);
        }

        terminate(process)
    }
}

fn fork_or_fail() -> Result<ForkResult> {
    unsafe { fork() }.map_err(|source| Error::ForkFailed {
        call: "fork",
        source,
    })
}

/// Becomes a session leader, then forks again so the daemon can never
/// reacquire a controlling terminal.
fn detach() -> Result<()> {
    setsid().map_err(|source| Error::ForkFailed {
        call: "setsid",
        source,
    })?;

    if let ForkResult::Parent { .. } = fork_or_fail()? {
        std::process::exit(EXIT_SUCCESS);
    }
    signal::clear_pending();

    Ok(())
}

fn write_pid_file(path: &Path, process: &Supervisor) -> Result<()> {
    std::fs::write(path, format!("{}\n", process.identity().raw_pid())).map_err(|source| {
        Error::PidFile {
            path: path.to_path_buf(),
            source,
        }
    })
}

impl<M: DaemonMain + 'static> ManagedProcess for Daemon<M> {
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
        Daemon::start(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let process = Supervisor::current();

        write_pid_file(&path, &process).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("{}\n", std::process::id())
        );
    }

    #[test]
    fn pid_file_failure_is_reported() {
        let process = Supervisor::current();
        let err = write_pid_file(Path::new("/nonexistent/dir/daemon.pid"), &process).unwrap_err();
        assert!(matches!(err, Error::PidFile { .. }));
    }
}
