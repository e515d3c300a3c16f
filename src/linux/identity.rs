use super::error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;

/// A process known by pid, with an optional link to the process that
/// supervises it.
///
/// The parent link is a supervision-tree relation, kept by pid so that a
/// child record never owns its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessIdentity {
    pid: Option<Pid>,
    parent: Option<Pid>,
}

impl ProcessIdentity {
    pub fn new(pid: Option<Pid>, parent: Option<Pid>) -> ProcessIdentity {
        ProcessIdentity {
            pid: pid.filter(|pid| pid.as_raw() > 0),
            parent,
        }
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Pid as a raw number, 0 when the process was not started.
    pub fn raw_pid(&self) -> libc::pid_t {
        self.pid.map(Pid::as_raw).unwrap_or(0)
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub(crate) fn set_pid(&mut self, pid: Option<Pid>) {
        self.pid = pid.filter(|pid| pid.as_raw() > 0);
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Pid>) {
        self.parent = parent;
    }

    /// Probes the process with signal 0. A zombie child still exists.
    pub fn exists(&self) -> bool {
        match self.pid {
            Some(pid) => kill(pid, None).is_ok(),
            None => false,
        }
    }

    pub fn send_signal(&self, signal: Signal) -> bool {
        match self.pid {
            Some(pid) => kill(pid, signal).is_ok(),
            None => false,
        }
    }

    /// Current working directory, resolved through `/proc/<pid>/cwd`.
    pub fn working_directory(&self) -> Result<PathBuf> {
        let path = self.procfs_path("cwd");
        self.procfs_process()
            .and_then(|process| process.cwd())
            .map_err(|source| Error::ProcfsAccessDenied { path, source })
    }

    /// Command line from `/proc/<pid>/cmdline`, arguments joined by single
    /// spaces.
    pub fn command_line(&self) -> Result<String> {
        let path = self.procfs_path("cmdline");
        let words = self
            .procfs_process()
            .and_then(|process| process.cmdline())
            .map_err(|source| Error::ProcfsAccessDenied { path, source })?;

        Ok(words.join(" ").trim().to_string())
    }

    fn procfs_process(&self) -> procfs::ProcResult<procfs::process::Process> {
        match self.pid {
            Some(pid) => procfs::process::Process::new(pid.as_raw()),
            None => Err(procfs::ProcError::NotFound(Some(self.procfs_path("")))),
        }
    }

    fn procfs_path(&self, entry: &str) -> PathBuf {
        PathBuf::from(format!("/proc/{}", self.raw_pid())).join(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linux::system::current_pid;

    #[test]
    fn unstarted_process() {
        let identity = ProcessIdentity::default();
        assert_eq!(identity.raw_pid(), 0);
        assert!(!identity.exists());
        assert!(!identity.send_signal(Signal::SIGTERM));
        assert!(matches!(
            identity.working_directory(),
            Err(Error::ProcfsAccessDenied { .. })
        ));
    }

    #[test]
    fn zero_pid_means_not_started() {
        let identity = ProcessIdentity::new(Some(Pid::from_raw(0)), None);
        assert_eq!(identity.pid(), None);
    }

    #[test]
    fn introspect_self() {
        let identity = ProcessIdentity::new(Some(current_pid()), None);
        assert!(identity.exists());
        assert_eq!(
            identity.working_directory().unwrap(),
            std::env::current_dir().unwrap()
        );

        let expected = std::env::args().collect::<Vec<_>>().join(" ");
        assert_eq!(identity.command_line().unwrap(), expected.trim());
    }

    #[test]
    fn missing_process() {
        // pid_max never reaches this value
        let identity = ProcessIdentity::new(Some(Pid::from_raw(i32::MAX)), None);
        assert!(!identity.exists());
        assert!(identity.command_line().is_err());
    }
}
