use libc::c_int;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, Pid};
use std::os::unix::io::RawFd;

pub const NULL_DEVICE: &str = "/dev/null";

pub fn current_pid() -> Pid {
    nix::unistd::getpid()
}

/// Raw `waitpid` keeping the undecoded status.
///
/// `None` as pid waits for any child. Returns `Ok(None)` when `nohang` is set
/// and nothing has exited yet. Interrupted calls are restarted.
pub fn wait_raw(pid: Option<Pid>, nohang: bool) -> nix::Result<Option<(Pid, c_int)>> {
    let target = pid.map(Pid::as_raw).unwrap_or(-1);
    let flags = if nohang { libc::WNOHANG } else { 0 };
    let mut status: c_int = 0;

    loop {
        let res = unsafe { libc::waitpid(target, &mut status, flags) };
        match Errno::result(res) {
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
            Ok(0) => return Ok(None),
            Ok(reaped) => return Ok(Some((Pid::from_raw(reaped), status))),
        }
    }
}

/// Points stdin, stdout and stderr at the null device.
pub fn redirect_std_to_null() -> nix::Result<()> {
    let null_fd = nix::fcntl::open(NULL_DEVICE, OFlag::O_RDWR, Mode::empty())?;
    defer! {
        if null_fd > 2 {
            let _ = close(null_fd);
        }
    }

    for &fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO].iter() {
        if fd != null_fd {
            dup2(null_fd, fd)?;
        }
    }

    Ok(())
}

pub fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    nix::fcntl::fcntl(
        fd,
        nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC),
    )
    .map(drop)
}

pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> nix::Result<()> {
    let bits = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, nonblocking);
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(flags)).map(drop)
}
