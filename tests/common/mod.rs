#![allow(dead_code)]

use procvisor::config::ProcessOptions;
use procvisor::linux::{ForkTask, ManagedProcess, Supervisor, SupervisorHooks, TaskResult};
use procvisor::process::WaitOutcome;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

static LOCK: Mutex<()> = Mutex::new(());

/// Reaping any child and signal dispositions are process-wide, so tests that
/// fork or dispatch signals run one at a time.
pub fn serial() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn options(command: &str) -> ProcessOptions {
    ProcessOptions {
        command: Some(command.to_string()),
        ..ProcessOptions::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started(Option<Pid>),
    StartFailed,
    Exited(Option<Pid>, Option<WaitOutcome>),
    WaitFailed(Option<Pid>),
    Unknown(Pid, WaitOutcome),
}

#[derive(Default, Clone)]
pub struct Recorder {
    pub events: Rc<RefCell<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn exits(&self) -> Vec<(Option<Pid>, Option<WaitOutcome>)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Exited(pid, outcome) => Some((*pid, *outcome)),
                _ => None,
            })
            .collect()
    }
}

impl SupervisorHooks for Recorder {
    fn child_started(&mut self, child: &dyn ManagedProcess) {
        self.events.borrow_mut().push(Event::Started(child.pid()));
    }

    fn child_start_failed(&mut self, _child: &dyn ManagedProcess) {
        self.events.borrow_mut().push(Event::StartFailed);
    }

    fn child_exited(&mut self, child: &dyn ManagedProcess) {
        self.events
            .borrow_mut()
            .push(Event::Exited(child.pid(), child.supervisor().last_outcome()));
    }

    fn child_wait_failed(&mut self, child: &dyn ManagedProcess, _error: &procvisor::linux::Error) {
        self.events.borrow_mut().push(Event::WaitFailed(child.pid()));
    }

    fn unknown_child_exited(&mut self, pid: Pid, outcome: &WaitOutcome) {
        self.events.borrow_mut().push(Event::Unknown(pid, *outcome));
    }
}

pub fn supervised() -> (Supervisor, Recorder) {
    let recorder = Recorder::default();
    let mut supervisor = Supervisor::current();
    supervisor.set_hooks(Box::new(recorder.clone()));
    (supervisor, recorder)
}

/// Child that exits with a fixed code.
pub struct ExitWith(pub i32);

impl ForkTask for ExitWith {
    fn child(&mut self, process: &mut Supervisor) -> TaskResult {
        process.set_exit_code(self.0);
        Ok(())
    }
}

/// Child that sleeps until it is signalled or the time runs out.
pub struct Sleep(pub Duration);

impl ForkTask for Sleep {
    fn child(&mut self, _process: &mut Supervisor) -> TaskResult {
        std::thread::sleep(self.0);
        Ok(())
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let started_at = Instant::now();
    while started_at.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
