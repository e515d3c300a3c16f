//! Signal handling with deferred dispatch.
//!
//! The handler installed in the OS only records that a signal arrived. The
//! registered Rust handlers run later, when the owning supervisor reaches an
//! explicit dispatch point (`Supervisor::dispatch_signals`). Handler bodies
//! therefore never run inside asynchronous signal delivery, but they should
//! still stay short: no forking and no blocking I/O.

use super::supervisor::Supervisor;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_SIGNAL: usize = 65;

#[allow(clippy::declare_interior_mutable_const)]
const NOT_PENDING: AtomicBool = AtomicBool::new(false);

static PENDING: [AtomicBool; MAX_SIGNAL] = [NOT_PENDING; MAX_SIGNAL];

extern "C" fn record_signal(signo: libc::c_int) {
    if let Some(flag) = PENDING.get(signo as usize) {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Installs the recording handler for `signal`.
pub(crate) fn install(signal: Signal) -> nix::Result<()> {
    let mut flags = SaFlags::SA_RESTART;
    if signal == Signal::SIGCHLD {
        flags |= SaFlags::SA_NOCLDSTOP;
    }
    let action = SigAction::new(SigHandler::Handler(record_signal), flags, SigSet::empty());

    unsafe { sigaction(signal, &action) }.map(drop)
}

/// Restores the default disposition and forgets a pending delivery.
pub(crate) fn restore_default(signal: Signal) -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(signal, &action) }?;
    PENDING[signal as usize].store(false, Ordering::SeqCst);

    Ok(())
}

/// Takes every signal recorded since the last call, in signal number order.
pub(crate) fn take_pending() -> Vec<Signal> {
    PENDING
        .iter()
        .enumerate()
        .filter(|(_, flag)| flag.swap(false, Ordering::SeqCst))
        .filter_map(|(signo, _)| Signal::try_from(signo as libc::c_int).ok())
        .collect()
}

/// Drops every recorded signal.
///
/// A forked child starts with no pending signals, so the flags copied from
/// the parent's memory must not be dispatched there.
pub(crate) fn clear_pending() {
    for flag in PENDING.iter() {
        flag.store(false, Ordering::SeqCst);
    }
}

pub type SignalHandler = Rc<dyn Fn(&mut Supervisor, Signal)>;

/// Handlers bound by the supervisor of the current process.
///
/// Cloning produces an independent table: this is how a child receives its
/// parent's handlers at fork time.
#[derive(Clone, Default)]
pub struct SignalTable {
    handlers: HashMap<Signal, SignalHandler>,
}

impl SignalTable {
    pub fn new() -> SignalTable {
        SignalTable::default()
    }

    pub fn get(&self, signal: Signal) -> Option<SignalHandler> {
        self.handlers.get(&signal).cloned()
    }

    pub fn contains(&self, signal: Signal) -> bool {
        self.handlers.contains_key(&signal)
    }

    pub fn insert(&mut self, signal: Signal, handler: SignalHandler) -> Option<SignalHandler> {
        self.handlers.insert(signal, handler)
    }

    pub fn remove(&mut self, signal: Signal) -> Option<SignalHandler> {
        self.handlers.remove(&signal)
    }

    pub fn signals(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.handlers.keys().copied().collect();
        signals.sort_by_key(|signal| *signal as libc::c_int);
        signals
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for SignalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.signals()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> SignalHandler {
        Rc::new(|_: &mut Supervisor, _: Signal| {})
    }

    #[test]
    fn cloned_table_is_independent() {
        let mut parent = SignalTable::new();
        parent.insert(Signal::SIGUSR1, noop());
        parent.insert(Signal::SIGHUP, noop());

        let mut child = parent.clone();
        child.remove(Signal::SIGUSR1);
        child.insert(Signal::SIGUSR2, noop());

        assert_eq!(parent.signals(), vec![Signal::SIGHUP, Signal::SIGUSR1]);
        assert_eq!(child.signals(), vec![Signal::SIGHUP, Signal::SIGUSR2]);
    }

    #[test]
    fn replacing_handler_returns_previous() {
        let mut table = SignalTable::new();
        assert!(table.insert(Signal::SIGTERM, noop()).is_none());
        assert!(table.insert(Signal::SIGTERM, noop()).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn recorded_signal_is_taken_once() {
        record_signal(Signal::SIGWINCH as libc::c_int);
        let pending = take_pending();
        assert!(pending.contains(&Signal::SIGWINCH));
        assert!(!take_pending().contains(&Signal::SIGWINCH));
    }
}
