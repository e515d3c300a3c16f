use nix::unistd::Pid;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("posix error")]
    Nix(#[from] nix::Error),

    #[error("{call} failed: {source}")]
    ForkFailed {
        call: &'static str,
        source: nix::Error,
    },

    #[error("waitpid failed for {pid}: {source}")]
    WaitFailed { pid: Pid, source: nix::Error },

    #[error("access denied to {path:?}")]
    ProcfsAccessDenied {
        path: PathBuf,
        source: procfs::ProcError,
    },

    #[error("{operation} is not allowed in this process context")]
    InvalidContext { operation: &'static str },

    #[error("cannot spawn {command:?}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("i/o failure on pipe {index}")]
    IoFailure {
        index: usize,
        source: std::io::Error,
    },

    #[error("cannot write pid file {path:?}")]
    PidFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration unparsable")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Errno carried by a failed syscall, if any.
    pub fn errno(&self) -> Option<nix::errno::Errno> {
        match self {
            Error::Nix(errno)
            | Error::ForkFailed { source: errno, .. }
            | Error::WaitFailed { source: errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
