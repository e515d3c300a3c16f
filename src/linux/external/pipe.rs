use super::super::error::{Error, Result};
use super::super::system::set_nonblocking;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd};

/// Chunk read from the OS when nothing is buffered.
const DEFAULT_READ_BUFFER: usize = 8192;

/// Which directions the parent can use on a pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// The parent reads what the child writes.
    Read,
    /// The parent writes what the child reads.
    Write,
    /// Both, for a pty master.
    Duplex,
}

impl PipeDirection {
    fn readable(self) -> bool {
        self != PipeDirection::Write
    }

    fn writable(self) -> bool {
        self != PipeDirection::Read
    }
}

/// Result of reading a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeByte {
    Byte(u8),
    /// Nothing available yet on a non-blocking pipe.
    Pending,
    /// The other side closed and everything was read.
    Eof,
}

/// Parent side of one redirected descriptor.
#[derive(Debug)]
pub struct Pipe {
    index: usize,
    file: File,
    direction: PipeDirection,
    blocking: bool,
    eof: bool,
    read_chunk: usize,
    read_buffer: Vec<u8>,
    read_pos: usize,
    write_limit: usize,
    write_buffer: Vec<u8>,
}

impl Pipe {
    pub fn new(index: usize, fd: OwnedFd, direction: PipeDirection) -> Pipe {
        Pipe {
            index,
            file: File::from(fd),
            direction,
            blocking: true,
            eof: false,
            read_chunk: DEFAULT_READ_BUFFER,
            read_buffer: Vec::new(),
            read_pos: 0,
            write_limit: 0,
            write_buffer: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> PipeDirection {
        self.direction
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn failure(&self, source: io::Error) -> Error {
        Error::IoFailure {
            index: self.index,
            source,
        }
    }

    fn unsupported(&self, what: &str) -> Error {
        self.failure(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("pipe is not {}", what),
        ))
    }

    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        set_nonblocking(self.file.as_raw_fd(), !blocking)
            .map_err(|errno| self.failure(io::Error::from(errno)))?;
        self.blocking = blocking;

        Ok(())
    }

    /// Bytes fetched from the OS per read. Zero reads byte by byte.
    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_chunk = size.max(1);
    }

    /// Bytes collected before writing to the OS. Zero writes through.
    pub fn set_write_buffer_size(&mut self, size: usize) -> Result<()> {
        self.write_limit = size;
        if self.write_buffer.len() >= self.write_limit {
            self.flush()?;
        }

        Ok(())
    }

    fn buffered(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..]
    }

    /// Zero-timeout poll for `flags`. Hang-up and errors count as ready: the
    /// next operation returns without blocking.
    fn poll_ready(&self, flags: PollFlags) -> Result<bool> {
        let mut fds = [PollFd::new(self.file.as_fd(), flags)];
        loop {
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                    return Ok(revents
                        .intersects(flags | PollFlags::POLLHUP | PollFlags::POLLERR));
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(errno) => return Err(self.failure(io::Error::from(errno))),
            }
        }
    }

    pub fn ready_for_read(&self) -> Result<bool> {
        if !self.direction.readable() {
            return Ok(false);
        }
        if !self.buffered().is_empty() || self.eof {
            return Ok(true);
        }

        self.poll_ready(PollFlags::POLLIN)
    }

    pub fn ready_for_write(&self) -> Result<bool> {
        if !self.direction.writable() {
            return Ok(false);
        }

        self.poll_ready(PollFlags::POLLOUT)
    }

    /// Reads one chunk from the OS into the buffer.
    ///
    /// `Ok(None)` means a non-blocking pipe has nothing yet.
    fn fill(&mut self) -> Result<Option<usize>> {
        if self.read_pos >= self.read_buffer.len() {
            self.read_buffer.clear();
            self.read_pos = 0;
        }

        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(Some(0));
                }
                Ok(n) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    return Ok(Some(n));
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // a pty master reports EIO once the child side is gone
                Err(ref err)
                    if self.direction == PipeDirection::Duplex
                        && err.raw_os_error() == Some(libc::EIO) =>
                {
                    self.eof = true;
                    return Ok(Some(0));
                }
                Err(err) => return Err(self.failure(err)),
            }
        }
    }

    pub fn read_byte(&mut self) -> Result<PipeByte> {
        if !self.direction.readable() {
            return Err(self.unsupported("readable"));
        }

        if self.buffered().is_empty() {
            if self.eof {
                return Ok(PipeByte::Eof);
            }
            match self.fill()? {
                None => return Ok(PipeByte::Pending),
                Some(0) => return Ok(PipeByte::Eof),
                Some(_) => {}
            }
        }

        let byte = self.read_buffer[self.read_pos];
        self.read_pos += 1;

        Ok(PipeByte::Byte(byte))
    }

    /// Reads until end of stream, or on a non-blocking pipe until nothing
    /// more is available.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        if !self.direction.readable() {
            return Err(self.unsupported("readable"));
        }

        let mut bytes = self.buffered().to_vec();
        self.read_buffer.clear();
        self.read_pos = 0;

        while !self.eof {
            match self.fill()? {
                None | Some(0) => break,
                Some(_) => {
                    bytes.extend_from_slice(&self.read_buffer);
                    self.read_buffer.clear();
                }
            }
        }

        Ok(bytes)
    }

    /// Writes `bytes`, returning how many were accepted.
    ///
    /// A blocking pipe takes everything. A non-blocking pipe takes what fits
    /// right now, possibly nothing. The write buffer never grows past its
    /// size: once full and not drained, further bytes are refused.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if !self.direction.writable() {
            return Err(self.unsupported("writable"));
        }
        if self.write_limit == 0 {
            return self.write_through(bytes);
        }

        if self.write_buffer.len() + bytes.len() > self.write_limit {
            self.flush()?;
        }
        if self.write_buffer.is_empty() && bytes.len() >= self.write_limit {
            return self.write_through(bytes);
        }

        let room = self.write_limit.saturating_sub(self.write_buffer.len());
        let accepted = room.min(bytes.len());
        self.write_buffer.extend_from_slice(&bytes[..accepted]);
        if self.write_buffer.len() >= self.write_limit {
            self.flush()?;
        }

        Ok(accepted)
    }

    fn write_through(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < bytes.len() {
            match self.file.write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(self.failure(err)),
            }
        }

        Ok(written)
    }

    /// Writes out collected bytes. On a non-blocking pipe the part that did
    /// not fit stays buffered.
    pub fn flush(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.write_buffer);
        let written = self.write_through(&pending)?;
        self.write_buffer = pending[written..].to_vec();

        Ok(())
    }

    /// Flushes and closes the endpoint.
    pub fn close(mut self) -> Result<()> {
        let flushed = self.flush();
        drop(self.file);
        flushed
    }
}

/// Open parent-side endpoints of an external command, by descriptor index.
#[derive(Debug, Default)]
pub struct PipeSet {
    pipes: BTreeMap<usize, Pipe>,
}

impl PipeSet {
    pub fn new() -> PipeSet {
        PipeSet::default()
    }

    pub fn insert(&mut self, pipe: Pipe) {
        self.pipes.insert(pipe.index(), pipe);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.pipes.contains_key(&index)
    }

    pub fn get(&self, index: usize) -> Option<&Pipe> {
        self.pipes.get(&index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Pipe> {
        self.pipes.get_mut(&index)
    }

    pub fn indexes(&self) -> Vec<usize> {
        self.pipes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Closes one endpoint. `None` when no pipe has this index.
    pub fn close(&mut self, index: usize) -> Option<Result<()>> {
        self.pipes.remove(&index).map(Pipe::close)
    }

    /// Closes every endpoint, returns how many closed cleanly.
    pub fn close_all(&mut self) -> usize {
        let pipes = std::mem::take(&mut self.pipes);
        pipes
            .into_values()
            .map(Pipe::close)
            .filter(|closed| closed.is_ok())
            .count()
    }
}
