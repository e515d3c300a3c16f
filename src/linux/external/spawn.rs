use super::super::error::{Error, Result};
use super::super::system::{set_cloexec, wait_raw};
use super::descriptor::{open_options, DescriptorSpec, PipeMode, Redirect};
use super::pipe::{Pipe, PipeDirection};
use libc::{c_char, c_int};
use log::debug;
use nix::fcntl::OFlag;
use nix::pty::openpty;
use nix::unistd::{fork, pipe2, ForkResult, Pid};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

const SHELL: &str = "/bin/sh";

/// Exit code of a child that could not exec.
const EXEC_FAILED: c_int = 127;

/// A command running in a child process, with the parent side of its pipes.
#[derive(Debug)]
pub struct Spawned {
    pub pid: Pid,
    pub pipes: Vec<Pipe>,
}

/// A descriptor of the parent to install at `target` in the child.
#[derive(Debug, Clone, Copy)]
struct Placement {
    source: RawFd,
    target: RawFd,
}

fn spawn_error(command: &str, source: io::Error) -> Error {
    Error::SpawnFailed {
        command: command.to_string(),
        source,
    }
}

fn c_string<B: Into<Vec<u8>>>(command: &str, bytes: B) -> Result<CString> {
    CString::new(bytes).map_err(|err| {
        spawn_error(command, io::Error::new(io::ErrorKind::InvalidInput, err))
    })
}

/// Runs `command` through the shell with the descriptors of `spec`.
///
/// A failure to change directory or to exec in the child is reported back
/// over a close-on-exec pipe, so it surfaces here as [`Error::SpawnFailed`].
pub fn spawn(
    command: &str,
    working_dir: &Path,
    env: &BTreeMap<String, String>,
    spec: &DescriptorSpec,
) -> Result<Spawned> {
    let argv = vec![
        c_string(command, SHELL)?,
        c_string(command, "-c")?,
        c_string(command, format!("exec {}", command))?,
    ];
    let envp = env
        .iter()
        .map(|(key, value)| c_string(command, format!("{}={}", key, value)))
        .collect::<Result<Vec<_>>>()?;
    let cwd = c_string(command, working_dir.as_os_str().as_bytes())?;

    let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let mut envp_ptrs: Vec<*const c_char> = envp.iter().map(|var| var.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    let mut pipes = Vec::new();
    // child ends, closed in the parent once the child holds them
    let mut child_ends: Vec<OwnedFd> = Vec::new();
    let mut placements = Vec::new();

    for (index, redirect) in spec.iter() {
        let source = match redirect {
            Redirect::Pipe(mode) => {
                let (read_end, write_end) =
                    pipe2(OFlag::O_CLOEXEC).map_err(|errno| spawn_error(command, errno.into()))?;
                let (parent_end, child_end, direction) = match mode {
                    PipeMode::Write => (read_end, write_end, PipeDirection::Read),
                    PipeMode::Read => (write_end, read_end, PipeDirection::Write),
                };
                pipes.push(Pipe::new(index, parent_end, direction));
                let fd = child_end.as_raw_fd();
                child_ends.push(child_end);
                fd
            }
            Redirect::File { path, mode } => {
                let options = open_options(mode).ok_or_else(|| {
                    spawn_error(
                        command,
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("invalid file mode {:?}", mode),
                        ),
                    )
                })?;
                let file = options.open(path).map_err(|err| spawn_error(command, err))?;
                let fd = file.as_raw_fd();
                child_ends.push(OwnedFd::from(file));
                fd
            }
            Redirect::Resource(fd) => fd.as_raw_fd(),
            Redirect::Pty => {
                let pty = openpty(None, None).map_err(|errno| spawn_error(command, errno.into()))?;
                set_cloexec(pty.master.as_raw_fd())
                    .and_then(|_| set_cloexec(pty.slave.as_raw_fd()))
                    .map_err(|errno| spawn_error(command, errno.into()))?;
                pipes.push(Pipe::new(index, pty.master, PipeDirection::Duplex));
                let fd = pty.slave.as_raw_fd();
                child_ends.push(pty.slave);
                fd
            }
        };

        placements.push(Placement {
            source,
            target: index as RawFd,
        });
    }

    let (error_read, error_write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|errno| spawn_error(command, errno.into()))?;
    let lowest_free = placements
        .iter()
        .map(|placement| placement.target + 1)
        .max()
        .unwrap_or(0)
        .max(3);

    match unsafe { fork() }.map_err(|errno| spawn_error(command, errno.into()))? {
        ForkResult::Child => unsafe {
            exec_child(
                &mut placements,
                lowest_free,
                error_write.as_raw_fd(),
                &cwd,
                &argv_ptrs,
                if envp.is_empty() { None } else { Some(&envp_ptrs) },
            )
        },
        ForkResult::Parent { child } => {
            drop(child_ends);
            drop(error_write);

            let mut report = Vec::new();
            File::from(error_read)
                .read_to_end(&mut report)
                .map_err(|err| spawn_error(command, err))?;

            if report.len() >= 4 {
                let errno = c_int::from_ne_bytes([report[0], report[1], report[2], report[3]]);
                // the child exits right after reporting
                let _ = wait_raw(Some(child), false);
                return Err(spawn_error(command, io::Error::from_raw_os_error(errno)));
            }

            debug!("spawned {:?} as {}", command, child);
            Ok(Spawned { pid: child, pipes })
        }
    }
}

/// Child side of [`spawn`]. Only async-signal-safe calls from here on: the
/// parent may have other threads.
unsafe fn exec_child(
    placements: &mut [Placement],
    lowest_free: RawFd,
    error_fd: RawFd,
    cwd: &CString,
    argv: &[*const c_char],
    envp: Option<&Vec<*const c_char>>,
) -> ! {
    // move every source above the targets so no dup2 clobbers a later source
    let error_fd = libc::fcntl(error_fd, libc::F_DUPFD_CLOEXEC, lowest_free);
    if error_fd < 0 {
        libc::_exit(EXEC_FAILED);
    }
    for placement in placements.iter_mut() {
        let moved = libc::fcntl(placement.source, libc::F_DUPFD_CLOEXEC, lowest_free);
        if moved < 0 {
            report_and_exit(error_fd);
        }
        placement.source = moved;
    }
    for placement in placements.iter() {
        if libc::dup2(placement.source, placement.target) < 0 {
            report_and_exit(error_fd);
        }
    }

    if libc::chdir(cwd.as_ptr()) < 0 {
        report_and_exit(error_fd);
    }

    match envp {
        Some(envp) => libc::execve(argv[0], argv.as_ptr(), envp.as_ptr()),
        None => libc::execv(argv[0], argv.as_ptr()),
    };

    report_and_exit(error_fd)
}

unsafe fn report_and_exit(error_fd: RawFd) -> ! {
    let errno = *libc::__errno_location();
    let bytes = errno.to_ne_bytes();
    libc::write(error_fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
    libc::_exit(EXEC_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_in_command_is_rejected_before_fork() {
        let err = spawn(
            "echo \0",
            Path::new("/"),
            &BTreeMap::new(),
            &DescriptorSpec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { ref command, .. } if command == "echo \0"));
    }

    #[test]
    fn invalid_file_mode_is_rejected_before_fork() {
        let spec = DescriptorSpec::new().set_file(1, "/dev/null", "q");
        let err = spawn("true", Path::new("/"), &BTreeMap::new(), &spec).unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { .. }));
    }
}
