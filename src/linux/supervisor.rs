use super::error::{Error, Result};
use super::identity::ProcessIdentity;
use super::signal::{self, SignalHandler, SignalTable};
use super::system::{current_pid, wait_raw};
use crate::config::ProcessOptions;
use crate::process::{ProcessStatus, WaitOutcome, EXIT_SUCCESS};
use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Interval between non-blocking reaps while a bounded stop is waiting.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Identity key of a child registered in a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildId(u64);

/// A process kind that can be started, stopped and waited for.
///
/// Every kind embeds a [`Supervisor`] describing the process itself. The
/// supervisor bookkeeping only talks to children through this trait.
pub trait ManagedProcess {
    fn supervisor(&self) -> &Supervisor;

    fn supervisor_mut(&mut self) -> &mut Supervisor;

    /// The concrete process, for downcasting a registered child.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn start(&mut self) -> Result<bool>;

    fn stop(&mut self) -> Result<bool> {
        self.supervisor_mut().stop()
    }

    fn wait(&mut self) -> Result<Option<WaitOutcome>> {
        self.supervisor_mut().wait()
    }

    fn pid(&self) -> Option<Pid> {
        self.supervisor().pid()
    }

    fn exists(&self) -> bool {
        self.supervisor().exists()
    }

    fn send_signal(&self, signal: Signal) -> bool {
        self.supervisor().send_signal(signal)
    }
}

/// Notifications fired by a [`Supervisor`] about its children.
///
/// All methods do nothing by default.
pub trait SupervisorHooks {
    fn child_started(&mut self, _child: &dyn ManagedProcess) {}

    fn child_start_failed(&mut self, _child: &dyn ManagedProcess) {}

    fn child_exited(&mut self, _child: &dyn ManagedProcess) {}

    fn child_wait_failed(&mut self, _child: &dyn ManagedProcess, _error: &Error) {}

    /// A child that was never registered here has been reaped.
    fn unknown_child_exited(&mut self, _pid: Pid, _outcome: &WaitOutcome) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SupervisorHooks for NoHooks {}

/// A process as seen from the current process: the current process itself,
/// or a peer such as one of its children.
///
/// Child bookkeeping and signal handlers are only touched while the
/// supervisor describes the current process.
pub struct Supervisor {
    identity: ProcessIdentity,
    working_dir: PathBuf,
    command: String,

    exit_code: i32,
    last_outcome: Option<WaitOutcome>,

    children: HashMap<ChildId, Box<dyn ManagedProcess>>,
    child_by_pid: HashMap<Pid, ChildId>,
    next_child_id: u64,

    signals: SignalTable,
    hooks: Box<dyn SupervisorHooks>,
}

impl Supervisor {
    /// A supervisor for a process that is not started yet.
    ///
    /// An empty working directory resolves to the current directory, an
    /// empty command to the command line of the current process.
    pub fn new(options: &ProcessOptions) -> Supervisor {
        Supervisor::with_pid(None, options)
    }

    pub fn with_pid(pid: Option<Pid>, options: &ProcessOptions) -> Supervisor {
        let working_dir = match &options.working_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        };
        let command = match &options.command {
            Some(command) if !command.is_empty() => command.clone(),
            _ => own_command_line(),
        };

        Supervisor {
            identity: ProcessIdentity::new(pid, None),
            working_dir,
            command,
            exit_code: EXIT_SUCCESS,
            last_outcome: None,
            children: HashMap::new(),
            child_by_pid: HashMap::new(),
            next_child_id: 0,
            signals: SignalTable::new(),
            hooks: Box::new(NoHooks),
        }
    }

    /// The supervisor of the calling process.
    pub fn current() -> Supervisor {
        Supervisor::with_pid(Some(current_pid()), &ProcessOptions::default())
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn SupervisorHooks>) {
        self.hooks = hooks;
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn pid(&self) -> Option<Pid> {
        self.identity.pid()
    }

    pub fn parent(&self) -> Option<Pid> {
        self.identity.parent()
    }

    pub(crate) fn assign_pid(&mut self, pid: Pid) {
        self.identity.set_pid(Some(pid));
        self.last_outcome = None;
    }

    /// The supervisor describes the calling process right now.
    pub fn is_current(&self) -> bool {
        self.pid() == Some(current_pid())
    }

    /// The process exists in the OS and was not reaped through this
    /// supervisor. After reaping, the pid may already belong to someone else.
    pub fn exists(&self) -> bool {
        !self.is_reaped() && self.identity.exists()
    }

    pub fn send_signal(&self, signal: Signal) -> bool {
        !self.is_reaped() && self.identity.send_signal(signal)
    }

    /// A terminal outcome has been recorded for the current pid.
    pub fn is_reaped(&self) -> bool {
        self.last_outcome
            .map(|outcome| outcome.is_terminated())
            .unwrap_or(false)
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn set_exit_code(&mut self, exit_code: i32) {
        self.exit_code = exit_code;
    }

    pub fn last_outcome(&self) -> Option<WaitOutcome> {
        self.last_outcome
    }

    pub fn status(&self) -> ProcessStatus {
        match (self.pid(), self.last_outcome) {
            (None, _) => ProcessStatus::Ready,
            (Some(_), Some(outcome)) => outcome.status(),
            (Some(_), None) => ProcessStatus::Running,
        }
    }

    /// Working directory, refreshed from procfs when describing a peer.
    pub fn working_dir(&mut self) -> Result<PathBuf> {
        if !self.is_current() {
            self.working_dir = self.identity.working_directory()?;
        }

        Ok(self.working_dir.clone())
    }

    /// The configured working directory, without asking the OS.
    pub fn configured_working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Command line, refreshed from procfs when describing a peer.
    pub fn command(&mut self) -> Result<String> {
        if !self.is_current() {
            self.command = self.identity.command_line()?;
        }

        Ok(self.command.clone())
    }

    pub fn configured_command(&self) -> &str {
        &self.command
    }

    /// Starting a plain supervisor only succeeds for the current process.
    pub fn start(&mut self) -> Result<bool> {
        Ok(self.is_current())
    }

    /// Stops the process and blocks until it is reaped.
    ///
    /// For the current process this exits immediately with the stored exit
    /// code.
    pub fn stop(&mut self) -> Result<bool> {
        self.stop_within(None)
    }

    /// Like [`stop`](Supervisor::stop), but gives up waiting after `timeout`.
    ///
    /// Only the termination signal is sent. A process still alive when the
    /// timeout elapses is left to the caller, and `false` is returned.
    pub fn stop_within(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.is_current() {
            std::process::exit(self.exit_code);
        }
        if self.is_reaped() {
            return Ok(true);
        }
        // a zombie still exists here
        if !self.identity.exists() {
            return Ok(false);
        }
        if self.try_reap()?.is_some() {
            return Ok(true);
        }
        if !self.identity.send_signal(Signal::SIGTERM) {
            return Ok(false);
        }

        match timeout {
            None => {
                self.wait()?;
                Ok(true)
            }
            Some(timeout) => {
                let started_at = Instant::now();
                loop {
                    if self.try_reap()?.is_some() {
                        return Ok(true);
                    }
                    if started_at.elapsed() > timeout {
                        warn!(
                            "process {} still running {:?} after SIGTERM",
                            self.identity.raw_pid(),
                            timeout
                        );
                        return Ok(false);
                    }
                    std::thread::sleep(STOP_POLL_INTERVAL);
                }
            }
        }
    }

    /// Blocks until the process exits.
    ///
    /// The current process never waits for itself: the last recorded outcome
    /// is returned instead.
    pub fn wait(&mut self) -> Result<Option<WaitOutcome>> {
        if self.is_current() || self.is_reaped() {
            return Ok(self.last_outcome);
        }
        let pid = match self.pid() {
            Some(pid) => pid,
            None => return Ok(None),
        };

        loop {
            match wait_raw(Some(pid), false) {
                Ok(Some((_, status))) => {
                    let outcome = WaitOutcome::from_raw(status);
                    self.record_outcome(outcome);
                    if outcome.is_terminated() {
                        return Ok(Some(outcome));
                    }
                }
                Ok(None) => continue,
                Err(source) => return Err(Error::WaitFailed { pid, source }),
            }
        }
    }

    /// Non-blocking reap of this process.
    pub fn try_reap(&mut self) -> Result<Option<WaitOutcome>> {
        if self.is_reaped() {
            return Ok(self.last_outcome);
        }
        let pid = match self.pid() {
            Some(pid) => pid,
            None => return Ok(None),
        };

        match wait_raw(Some(pid), true) {
            Ok(Some((_, status))) => {
                let outcome = WaitOutcome::from_raw(status);
                self.record_outcome(outcome);
                Ok(Some(outcome).filter(WaitOutcome::is_terminated))
            }
            Ok(None) => Ok(None),
            Err(source) => Err(Error::WaitFailed { pid, source }),
        }
    }

    pub(crate) fn record_outcome(&mut self, outcome: WaitOutcome) {
        trace!("process {} reported {:?}", self.identity.raw_pid(), outcome);
        if let Some(code) = outcome.exit_code() {
            self.exit_code = code;
        }
        self.last_outcome = Some(outcome);
    }

    /// Binds a handler for `signal` in the current process.
    ///
    /// The handler runs at the next [`dispatch_signals`](Supervisor::dispatch_signals)
    /// call after the signal arrived. Keep it short: never fork or start
    /// children from a handler, and avoid blocking I/O.
    pub fn bind_signal<F>(&mut self, signal: Signal, handler: F) -> bool
    where
        F: Fn(Signal) + 'static,
    {
        self.bind_handler(signal, Rc::new(move |_: &mut Supervisor, signal| handler(signal)))
    }

    /// Binds a handler that receives this supervisor.
    pub fn bind_signal_method(
        &mut self,
        signal: Signal,
        method: fn(&mut Supervisor, Signal),
    ) -> bool {
        self.bind_handler(signal, Rc::new(method))
    }

    fn bind_handler(&mut self, signal: Signal, handler: SignalHandler) -> bool {
        if !self.is_current() {
            return false;
        }
        if let Err(err) = signal::install(signal) {
            warn!("cannot install handler for {}: {}", signal, err);
            return false;
        }
        self.signals.insert(signal, handler);

        true
    }

    /// Removes the handler of `signal` and restores the default action.
    pub fn unbind_signal(&mut self, signal: Signal) -> bool {
        if !self.is_current() {
            return false;
        }
        self.signals.remove(signal);

        match signal::restore_default(signal) {
            Ok(()) => true,
            Err(err) => {
                warn!("cannot restore default action of {}: {}", signal, err);
                false
            }
        }
    }

    pub fn signal_table(&self) -> &SignalTable {
        &self.signals
    }

    pub fn has_signal_handler(&self, signal: Signal) -> bool {
        self.signals.contains(signal)
    }

    /// Runs the handlers of all signals received since the previous call.
    ///
    /// Returns the number of handlers run. Signals without a bound handler
    /// are dropped.
    pub fn dispatch_signals(&mut self) -> Result<usize> {
        if !self.is_current() {
            return Err(Error::InvalidContext {
                operation: "dispatch_signals",
            });
        }

        let mut dispatched = 0;
        for signal in signal::take_pending() {
            if let Some(handler) = self.signals.get(signal) {
                handler(self, signal);
                dispatched += 1;
            }
        }

        Ok(dispatched)
    }

    /// Handler bound to SIGCHLD by [`start_child`](Supervisor::start_child).
    pub fn on_child_exit(&mut self, _signal: Signal) {
        self.check_children_status();
    }

    /// Copies what a child inherits from this process: the supervision link
    /// and, by value, the signal handlers.
    pub fn child_inheritance(&self, child: &mut Supervisor) {
        child.identity.set_parent(self.pid());
        child.signals = self.signals.clone();
    }

    /// Starts `child` and registers it.
    ///
    /// Returns the key of the registered child, or `None` when this is not
    /// the current process or the child failed to start.
    pub fn start_child(&mut self, mut child: Box<dyn ManagedProcess>) -> Result<Option<ChildId>> {
        if !self.is_current() {
            return Ok(None);
        }
        if !self.signals.contains(Signal::SIGCHLD)
            && !self.bind_signal_method(Signal::SIGCHLD, Supervisor::on_child_exit)
        {
            return Ok(None);
        }

        self.child_inheritance(child.supervisor_mut());

        if child.start()? {
            debug!("child {:?} started", child.pid());
            let id = self.register_child(child);
            if let Some(child) = self.children.get(&id) {
                self.hooks.child_started(child.as_ref());
            }
            return Ok(Some(id));
        }

        self.hooks.child_start_failed(child.as_ref());

        Ok(None)
    }

    /// Starts every child in turn, returns how many started.
    ///
    /// A child that fails to start fires `child_start_failed` and does not
    /// keep the others from starting.
    pub fn start_children<I>(&mut self, children: I) -> Result<usize>
    where
        I: IntoIterator<Item = Box<dyn ManagedProcess>>,
    {
        let mut started = 0;
        for child in children {
            if self.start_child(child)?.is_some() {
                started += 1;
            }
        }

        Ok(started)
    }

    /// Registers a process that is already a child of the current process.
    pub fn register_child(&mut self, child: Box<dyn ManagedProcess>) -> ChildId {
        let id = ChildId(self.next_child_id);
        self.next_child_id += 1;

        if let Some(pid) = child.pid() {
            self.child_by_pid.insert(pid, id);
        }
        self.children.insert(id, child);

        id
    }

    fn unset_child(&mut self, id: ChildId) -> Option<Box<dyn ManagedProcess>> {
        let child = self.children.remove(&id)?;
        if let Some(pid) = child.pid() {
            if self.child_by_pid.get(&pid) == Some(&id) {
                self.child_by_pid.remove(&pid);
            }
        }

        Some(child)
    }

    /// Looks a child up by pid.
    ///
    /// Children that received their pid after registration are found by a
    /// scan and indexed on the way.
    pub fn find_child(&mut self, pid: Pid) -> Option<ChildId> {
        if let Some(id) = self.child_by_pid.get(&pid) {
            return Some(*id);
        }

        let id = self
            .children
            .iter()
            .find(|(_, child)| child.pid() == Some(pid))
            .map(|(id, _)| *id)?;
        self.child_by_pid.insert(pid, id);

        Some(id)
    }

    pub fn child(&self, id: ChildId) -> Option<&dyn ManagedProcess> {
        self.children.get(&id).map(|child| child.as_ref())
    }

    pub fn child_mut(&mut self, id: ChildId) -> Option<&mut (dyn ManagedProcess + 'static)> {
        self.children.get_mut(&id).map(|child| child.as_mut())
    }

    /// The child `id` as its concrete type.
    pub fn child_as<T: ManagedProcess + 'static>(&self, id: ChildId) -> Option<&T> {
        self.children.get(&id)?.as_any().downcast_ref::<T>()
    }

    pub fn child_as_mut<T: ManagedProcess + 'static>(&mut self, id: ChildId) -> Option<&mut T> {
        self.children.get_mut(&id)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn child_ids(&self) -> Vec<ChildId> {
        let mut ids: Vec<ChildId> = self.children.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn children_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Reaps every child that has exited so far, without blocking.
    ///
    /// Each reaped child gets its outcome recorded, fires `child_exited` and
    /// is removed. Registered children already reaped through their own
    /// `wait` or `stop` are collected the same way. Returns the number of
    /// exits handled.
    pub fn check_children_status(&mut self) -> usize {
        let mut exited = 0;

        loop {
            match wait_raw(None, true) {
                Ok(Some((pid, status))) => {
                    let outcome = WaitOutcome::from_raw(status);
                    exited += 1;

                    match self.find_child(pid) {
                        Some(id) => {
                            if let Some(child) = self.children.get_mut(&id) {
                                child.supervisor_mut().record_outcome(outcome);
                            }
                            self.finish_child(id);
                        }
                        None => {
                            warn!("unregistered child {} exited: {:?}", pid, outcome);
                            self.hooks.unknown_child_exited(pid, &outcome);
                        }
                    }
                }
                Ok(None) | Err(Errno::ECHILD) => break,
                Err(err) => {
                    warn!("waitpid failed while checking children: {}", err);
                    break;
                }
            }
        }

        let reaped_elsewhere: Vec<ChildId> = self
            .children
            .iter()
            .filter(|(_, child)| child.supervisor().is_reaped())
            .map(|(id, _)| *id)
            .collect();
        for id in reaped_elsewhere {
            self.finish_child(id);
            exited += 1;
        }

        exited
    }

    fn finish_child(&mut self, id: ChildId) {
        if let Some(child) = self.children.get(&id) {
            debug!("child {:?} exited: {:?}", child.pid(), child.supervisor().status());
            self.hooks.child_exited(child.as_ref());
        }
        self.unset_child(id);
    }

    /// Blocks until the child `id` exits, keeping the bookkeeping in sync.
    pub fn wait_child(&mut self, id: ChildId) -> Result<Option<WaitOutcome>> {
        let result = match self.children.get_mut(&id) {
            Some(child) => child.wait(),
            None => return Ok(None),
        };
        self.settle_child(id, result)
    }

    /// Stops the child `id`, keeping the bookkeeping in sync.
    pub fn stop_child(&mut self, id: ChildId) -> Result<bool> {
        let result = match self.children.get_mut(&id) {
            Some(child) => child.stop(),
            None => return Ok(false),
        };
        let stopped = self.settle_child(id, result)?;

        Ok(stopped)
    }

    fn settle_child<T>(&mut self, id: ChildId, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                let reaped = self
                    .children
                    .get(&id)
                    .map(|child| child.supervisor().is_reaped())
                    .unwrap_or(false);
                if reaped {
                    self.finish_child(id);
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(child) = self.children.get(&id) {
                    self.hooks.child_wait_failed(child.as_ref(), &err);
                }
                Err(err)
            }
        }
    }

    /// Polls children until all have exited.
    ///
    /// Sleeps `poll_interval` whenever a round reaped nothing. Returns `false`
    /// when children remain after `total_timeout`; those are left to the
    /// caller.
    pub fn wait_children(&mut self, poll_interval: Duration, total_timeout: Duration) -> bool {
        let started_at = Instant::now();

        while self.has_children() {
            if self.check_children_status() == 0 {
                std::thread::sleep(poll_interval);
            }
            if self.has_children() && started_at.elapsed() > total_timeout {
                return false;
            }
        }

        true
    }

    /// Sends `signal` to every child, returns the number of deliveries.
    pub fn send_signal_to_children(&self, signal: Signal) -> usize {
        self.children
            .values()
            .filter(|child| child.send_signal(signal))
            .count()
    }
}

impl ManagedProcess for Supervisor {
    fn supervisor(&self) -> &Supervisor {
        self
    }

    fn supervisor_mut(&mut self) -> &mut Supervisor {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn start(&mut self) -> Result<bool> {
        Supervisor::start(self)
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("identity", &self.identity)
            .field("working_dir", &self.working_dir)
            .field("command", &self.command)
            .field("exit_code", &self.exit_code)
            .field("last_outcome", &self.last_outcome)
            .field("children", &self.child_ids())
            .field("signals", &self.signals)
            .finish()
    }
}

fn own_command_line() -> String {
    std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl SupervisorHooks for Recorder {
        fn child_start_failed(&mut self, child: &dyn ManagedProcess) {
            self.events
                .borrow_mut()
                .push(format!("start failed {:?}", child.pid()));
        }
    }

    fn peer(pid: i32) -> Supervisor {
        Supervisor::with_pid(Some(Pid::from_raw(pid)), &ProcessOptions::default())
    }

    #[test]
    fn current_context() {
        let mut current = Supervisor::current();
        assert!(current.is_current());
        assert!(current.start().unwrap());
        assert_eq!(current.status(), ProcessStatus::Running);
        assert_eq!(
            current.working_dir().unwrap(),
            std::env::current_dir().unwrap()
        );
        assert_eq!(current.command().unwrap(), own_command_line());
        assert_eq!(current.wait().unwrap(), None);
    }

    #[test]
    fn defaults_for_empty_options() {
        let options = ProcessOptions {
            working_dir: Some(PathBuf::new()),
            command: Some(String::new()),
            ..ProcessOptions::default()
        };
        let supervisor = Supervisor::new(&options);
        assert_eq!(supervisor.pid(), None);
        assert_eq!(supervisor.status(), ProcessStatus::Ready);
        assert_eq!(
            supervisor.configured_working_dir(),
            &std::env::current_dir().unwrap()
        );
        assert_eq!(supervisor.configured_command(), own_command_line());
        assert_eq!(supervisor.exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn peer_cannot_bind_signals() {
        let mut other = peer(i32::MAX);
        assert!(!other.is_current());
        assert!(!other.bind_signal(Signal::SIGUSR1, |_| {}));
        assert!(!other.unbind_signal(Signal::SIGUSR1));
        assert!(matches!(
            other.dispatch_signals(),
            Err(Error::InvalidContext { .. })
        ));
    }

    #[test]
    fn stopping_missing_process_fails() {
        let mut other = peer(i32::MAX);
        assert!(!other.exists());
        assert!(!other.stop().unwrap());
    }

    #[test]
    fn peer_cannot_start_children() {
        let mut other = peer(i32::MAX);
        let child = Box::new(Supervisor::new(&ProcessOptions::default()));
        assert_eq!(other.start_child(child).unwrap(), None);
        assert!(!other.has_children());
    }

    #[test]
    fn inheritance_copies_handlers() {
        let mut parent = Supervisor::current();
        parent
            .signals
            .insert(Signal::SIGUSR2, Rc::new(|_: &mut Supervisor, _: Signal| {}));
        let mut child = Supervisor::new(&ProcessOptions::default());

        parent.child_inheritance(&mut child);
        assert_eq!(child.parent(), parent.pid());
        assert!(child.has_signal_handler(Signal::SIGUSR2));

        child.signals.remove(Signal::SIGUSR2);
        assert!(parent.has_signal_handler(Signal::SIGUSR2));
    }

    #[test]
    fn failed_start_fires_hook() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut current = Supervisor::current();
        current.set_hooks(Box::new(Recorder {
            events: events.clone(),
        }));

        // a plain supervisor for another process cannot be started
        let child = Box::new(Supervisor::new(&ProcessOptions::default()));
        assert_eq!(current.start_child(child).unwrap(), None);
        assert_eq!(*events.borrow(), vec!["start failed None".to_string()]);
        assert!(current.has_signal_handler(Signal::SIGCHLD));
        assert!(!current.has_children());
    }

    #[test]
    fn dual_index_lookup() {
        let mut current = Supervisor::current();
        let mut late = Supervisor::new(&ProcessOptions::default());

        let early = current.register_child(Box::new(peer(4242)));
        late.assign_pid(Pid::from_raw(4343));
        let late = current.register_child(Box::new(late));

        assert_eq!(current.find_child(Pid::from_raw(4242)), Some(early));
        assert_eq!(current.find_child(Pid::from_raw(4343)), Some(late));
        assert_eq!(current.find_child(Pid::from_raw(4444)), None);
        assert_eq!(current.children_count(), 2);

        current.unset_child(early);
        assert_eq!(current.find_child(Pid::from_raw(4242)), None);
        assert_eq!(current.child_ids(), vec![late]);
    }

    #[test]
    fn reaped_child_is_collected_once() {
        let mut current = Supervisor::current();
        let mut child = peer(4545);
        child.record_outcome(WaitOutcome::from_raw(3 << 8));
        assert!(child.is_reaped());
        assert!(!child.exists());
        assert_eq!(child.exit_code(), 3);

        current.register_child(Box::new(child));
        assert_eq!(current.check_children_status(), 1);
        assert_eq!(current.check_children_status(), 0);
        assert!(!current.has_children());
    }
}
