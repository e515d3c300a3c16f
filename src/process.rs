use libc::c_int;

/// Exit code of a successful process.
pub const EXIT_SUCCESS: i32 = 0;
/// Generic failure exit code.
pub const EXIT_FAILURE: i32 = 1;

pub const STDIN_ID: usize = 0;
pub const STDOUT_ID: usize = 1;
pub const STDERR_ID: usize = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessStatus {
    /// The process has no pid yet
    Ready,

    /// The process is running, or its exit was not collected yet
    Running,

    /// The process exited normally with the given exit code.
    Exited(i32),

    /// The process was killed by the given signal.
    Signaled(i32),

    /// The process was stopped by the given signal.
    Stopped(i32),
}

/// Decoded status reported by `waitpid`.
///
/// The three outcomes are computed independently from the raw status with
/// the platform macros. For a terminated process exactly one of
/// [`normal_exit`](WaitOutcome::normal_exit) and
/// [`signaled_exit`](WaitOutcome::signaled_exit) holds. A stop is only
/// reported when waiting with `WUNTRACED` or while the process is traced.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WaitOutcome {
    status: c_int,
    exit_code: Option<i32>,
    signal: Option<i32>,
    stop_signal: Option<i32>,
}

impl WaitOutcome {
    pub fn from_raw(status: c_int) -> WaitOutcome {
        WaitOutcome {
            status,
            exit_code: if libc::WIFEXITED(status) {
                Some(libc::WEXITSTATUS(status))
            } else {
                None
            },
            signal: if libc::WIFSIGNALED(status) {
                Some(libc::WTERMSIG(status))
            } else {
                None
            },
            stop_signal: if libc::WIFSTOPPED(status) {
                Some(libc::WSTOPSIG(status))
            } else {
                None
            },
        }
    }

    /// Raw status value as returned by `waitpid`.
    pub fn raw(&self) -> c_int {
        self.status
    }

    pub fn normal_exit(&self) -> bool {
        self.exit_code.is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn signaled_exit(&self) -> bool {
        self.signal.is_some()
    }

    /// Number of the signal that terminated the process.
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn stopped(&self) -> bool {
        self.stop_signal.is_some()
    }

    pub fn stop_signal(&self) -> Option<i32> {
        self.stop_signal
    }

    pub fn core_dumped(&self) -> bool {
        self.signaled_exit() && libc::WCOREDUMP(self.status)
    }

    pub fn continued(&self) -> bool {
        libc::WIFCONTINUED(self.status)
    }

    /// True once the process is gone: it exited or was killed.
    pub fn is_terminated(&self) -> bool {
        self.normal_exit() || self.signaled_exit()
    }

    pub fn status(&self) -> ProcessStatus {
        if let Some(code) = self.exit_code {
            ProcessStatus::Exited(code)
        } else if let Some(signo) = self.signal {
            ProcessStatus::Signaled(signo)
        } else if let Some(signo) = self.stop_signal {
            ProcessStatus::Stopped(signo)
        } else {
            ProcessStatus::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Linux encoding: exit code in bits 8..16, terminating signal in the low
    // seven bits, 0x80 for a core dump, 0x7f in the low byte for a stop.
    fn exited(code: i32) -> c_int {
        (code & 0xff) << 8
    }

    fn signaled(signo: i32) -> c_int {
        signo & 0x7f
    }

    fn stopped(signo: i32) -> c_int {
        (signo << 8) | 0x7f
    }

    #[test]
    fn normal_exit() {
        let outcome = WaitOutcome::from_raw(exited(42));
        assert!(outcome.normal_exit());
        assert_eq!(outcome.exit_code(), Some(42));
        assert!(!outcome.signaled_exit());
        assert!(!outcome.stopped());
        assert_eq!(outcome.status(), ProcessStatus::Exited(42));
    }

    #[test]
    fn success_is_zero_status() {
        let outcome = WaitOutcome::from_raw(0);
        assert_eq!(outcome.exit_code(), Some(EXIT_SUCCESS));
        assert!(outcome.is_terminated());
    }

    #[test]
    fn signaled_exit() {
        let outcome = WaitOutcome::from_raw(signaled(libc::SIGTERM));
        assert!(!outcome.normal_exit());
        assert!(outcome.signaled_exit());
        assert_eq!(outcome.signal(), Some(libc::SIGTERM));
        assert!(!outcome.core_dumped());
        assert_eq!(outcome.status(), ProcessStatus::Signaled(libc::SIGTERM));
    }

    #[test]
    fn core_dump_flag() {
        let outcome = WaitOutcome::from_raw(signaled(libc::SIGSEGV) | 0x80);
        assert_eq!(outcome.signal(), Some(libc::SIGSEGV));
        assert!(outcome.core_dumped());
    }

    #[test]
    fn stopped_is_not_terminated() {
        let outcome = WaitOutcome::from_raw(stopped(libc::SIGSTOP));
        assert!(outcome.stopped());
        assert_eq!(outcome.stop_signal(), Some(libc::SIGSTOP));
        assert!(!outcome.normal_exit());
        assert!(!outcome.signaled_exit());
        assert!(!outcome.is_terminated());
        assert_eq!(outcome.status(), ProcessStatus::Stopped(libc::SIGSTOP));
    }

    #[test]
    fn continued_reports_nothing_else() {
        let outcome = WaitOutcome::from_raw(0xffff);
        assert!(outcome.continued());
        assert!(!outcome.is_terminated());
        assert!(!outcome.stopped());
        assert_eq!(outcome.status(), ProcessStatus::Running);
    }

    #[test]
    fn terminated_statuses_are_exclusive() {
        for code in 0..=255 {
            let outcome = WaitOutcome::from_raw(exited(code));
            assert!(outcome.normal_exit() && !outcome.signaled_exit());
            assert_eq!(outcome.exit_code(), Some(code));
        }
        for signo in 1..=31 {
            let outcome = WaitOutcome::from_raw(signaled(signo));
            assert!(outcome.signaled_exit() && !outcome.normal_exit());
            assert_eq!(outcome.signal(), Some(signo));
        }
    }
}
