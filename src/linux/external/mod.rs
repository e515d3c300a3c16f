mod descriptor;
mod pipe;
mod spawn;

pub use descriptor::{open_options, DescriptorSpec, PipeMode, Redirect};
pub use pipe::{Pipe, PipeByte, PipeDirection, PipeSet};

use super::error::Result;
use super::supervisor::{ManagedProcess, Supervisor};
use crate::config::{Config, ProcessOptions};
use crate::process::WaitOutcome;
use log::{debug, warn};
use nix::unistd::Pid;
use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

/// Time a stopping command gets between SIGTERM and giving up.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// A shell command run in a child process, with its descriptors redirected
/// according to a [`DescriptorSpec`].
///
/// Pipe operations take the descriptor index seen by the command. Unknown or
/// closed indexes fail, and I/O failures are logged and reported as failure.
pub struct ExternalProcess {
    process: Supervisor,
    command: String,
    spec: DescriptorSpec,
    env: BTreeMap<String, String>,
    terminate_timeout: Duration,

    handle: Option<Pid>,
    pipes: PipeSet,
}

impl ExternalProcess {
    pub fn new(options: &ProcessOptions, spec: DescriptorSpec) -> ExternalProcess {
        ExternalProcess {
            process: Supervisor::new(options),
            command: options.command.clone().unwrap_or_default(),
            spec,
            env: options.env.clone(),
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
            handle: None,
            pipes: PipeSet::new(),
        }
    }

    pub fn from_config(config: &Config) -> ExternalProcess {
        ExternalProcess::new(&config.process, config.external.descriptor_spec())
            .terminate_timeout(config.external.terminate_timeout())
    }

    /// Sets a variable of the command environment. Without any, the command
    /// inherits the environment of the current process.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> ExternalProcess {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn terminate_timeout(mut self, timeout: Duration) -> ExternalProcess {
        self.terminate_timeout = timeout;
        self
    }

    /// The configured command, never refreshed from the OS.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn descriptor_spec(&self) -> &DescriptorSpec {
        &self.spec
    }

    /// The command was spawned and its handle is still open.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<bool> {
        if self.command.trim().is_empty() {
            return Ok(false);
        }
        if self.handle.is_some() && self.process.exists() {
            return Ok(true);
        }
        self.close_handle();

        let working_dir = self.process.configured_working_dir().clone();
        match spawn::spawn(&self.command, &working_dir, &self.env, &self.spec) {
            Ok(spawned) => {
                self.process.assign_pid(spawned.pid);
                for pipe in spawned.pipes {
                    self.pipes.insert(pipe);
                }
                self.handle = Some(spawned.pid);
                Ok(true)
            }
            Err(err) => {
                warn!("{}", err);
                Ok(false)
            }
        }
    }

    /// Sends SIGTERM and waits at most the terminate timeout. Pipes and the
    /// handle are closed whatever the outcome.
    pub fn stop(&mut self) -> Result<bool> {
        if self.handle.is_none() {
            return Ok(false);
        }

        let stopped = self.process.stop_within(Some(self.terminate_timeout));
        self.close_handle();

        stopped
    }

    pub fn wait(&mut self) -> Result<Option<WaitOutcome>> {
        let outcome = self.process.wait();
        self.close_handle();

        outcome
    }

    fn close_handle(&mut self) {
        self.pipes.close_all();

        if let Some(pid) = self.handle.take() {
            if !self.process.is_reaped() {
                if let Err(err) = self.process.try_reap() {
                    warn!("cannot reap command {}: {}", pid, err);
                }
            }
            debug!("closed command {}", pid);
        }
    }

    fn with_pipe<T, F>(&mut self, index: usize, op: F) -> Option<T>
    where
        F: FnOnce(&mut Pipe) -> Result<T>,
    {
        let pipe = self.pipes.get_mut(index)?;
        match op(pipe) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("{}", err);
                None
            }
        }
    }

    pub fn has_pipe(&self, index: usize) -> bool {
        self.pipes.contains(index)
    }

    pub fn pipe_indexes(&self) -> Vec<usize> {
        self.pipes.indexes()
    }

    pub fn close_pipe(&mut self, index: usize) -> bool {
        match self.pipes.close(index) {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                warn!("{}", err);
                false
            }
            None => false,
        }
    }

    /// Closes every open pipe, returns how many closed cleanly.
    pub fn close_pipes(&mut self) -> usize {
        self.pipes.close_all()
    }

    pub fn set_blocking(&mut self, index: usize, blocking: bool) -> bool {
        self.with_pipe(index, |pipe| pipe.set_blocking(blocking))
            .is_some()
    }

    pub fn set_read_buffer_size(&mut self, index: usize, size: usize) -> bool {
        self.with_pipe(index, |pipe| {
            pipe.set_read_buffer_size(size);
            Ok(())
        })
        .is_some()
    }

    pub fn set_write_buffer_size(&mut self, index: usize, size: usize) -> bool {
        self.with_pipe(index, |pipe| pipe.set_write_buffer_size(size))
            .is_some()
    }

    pub fn ready_for_read(&mut self, index: usize) -> bool {
        self.with_pipe(index, |pipe| pipe.ready_for_read())
            .unwrap_or(false)
    }

    pub fn ready_for_write(&mut self, index: usize) -> bool {
        self.with_pipe(index, |pipe| pipe.ready_for_write())
            .unwrap_or(false)
    }

    /// Everything the command wrote, up to end of stream on a blocking pipe.
    pub fn read_all(&mut self, index: usize) -> Option<Vec<u8>> {
        self.with_pipe(index, Pipe::read_all)
    }

    /// `None` when there is no such pipe or reading failed.
    pub fn read_byte(&mut self, index: usize) -> Option<PipeByte> {
        self.with_pipe(index, Pipe::read_byte)
    }

    /// Returns `true` when the pipe accepted data. A full non-blocking pipe
    /// accepts nothing.
    pub fn write(&mut self, index: usize, bytes: &[u8]) -> bool {
        self.with_pipe(index, |pipe| pipe.write(bytes))
            .map(|written| written > 0 || bytes.is_empty())
            .unwrap_or(false)
    }

    pub fn flush(&mut self, index: usize) -> bool {
        self.with_pipe(index, Pipe::flush).is_some()
    }
}

impl ManagedProcess for ExternalProcess {
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
        ExternalProcess::start(self)
    }

    fn stop(&mut self) -> Result<bool> {
        ExternalProcess::stop(self)
    }

    fn wait(&mut self) -> Result<Option<WaitOutcome>> {
        ExternalProcess::wait(self)
    }
}

impl Drop for ExternalProcess {
    fn drop(&mut self) {
        self.close_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(command: &str) -> ProcessOptions {
        ProcessOptions {
            command: Some(command.to_string()),
            ..ProcessOptions::default()
        }
    }

    #[test]
    fn empty_command_does_not_start() {
        let mut external = ExternalProcess::new(&options("  "), DescriptorSpec::standard());
        assert!(!external.start().unwrap());
        assert!(!external.is_open());
        assert_eq!(external.pid(), None);
    }

    #[test]
    fn configured_command_is_kept() {
        let external = ExternalProcess::new(&options("sleep 1"), DescriptorSpec::new())
            .env("LANG", "C")
            .terminate_timeout(Duration::from_millis(200));
        assert_eq!(external.command(), "sleep 1");
        assert_eq!(external.terminate_timeout, Duration::from_millis(200));
        assert_eq!(external.env.get("LANG").map(String::as_str), Some("C"));
    }

    #[test]
    fn pipe_operations_fail_before_start() {
        let mut external = ExternalProcess::new(&options("cat"), DescriptorSpec::standard());
        assert!(!external.has_pipe(0));
        assert!(!external.write(0, b"input"));
        assert_eq!(external.read_byte(1), None);
        assert_eq!(external.read_all(1), None);
        assert!(!external.ready_for_read(1));
        assert!(!external.set_blocking(1, false));
        assert!(!external.close_pipe(0));
        assert_eq!(external.close_pipes(), 0);
        assert!(!external.stop().unwrap());
        assert_eq!(external.wait().unwrap(), None);
    }
}
