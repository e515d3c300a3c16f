use crate::process::{STDERR_ID, STDIN_ID, STDOUT_ID};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::os::unix::io::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

/// Direction of a pipe, seen from the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// The child reads, the parent writes.
    Read,
    /// The child writes, the parent reads.
    Write,
}

/// How one descriptor of an external command is connected.
#[derive(Debug, Clone)]
pub enum Redirect {
    Pipe(PipeMode),
    /// A file opened with an `fopen`-style mode such as `"r"`, `"wb"` or `"a+"`.
    File { path: PathBuf, mode: String },
    /// An already open descriptor, duplicated into the child.
    Resource(Arc<OwnedFd>),
    /// A pseudo terminal. The parent side reads and writes.
    Pty,
}

impl PartialEq for Redirect {
    fn eq(&self, other: &Redirect) -> bool {
        match (self, other) {
            (Redirect::Pipe(a), Redirect::Pipe(b)) => a == b,
            (
                Redirect::File { path, mode },
                Redirect::File {
                    path: other_path,
                    mode: other_mode,
                },
            ) => path == other_path && mode == other_mode,
            (Redirect::Resource(a), Redirect::Resource(b)) => Arc::ptr_eq(a, b),
            (Redirect::Pty, Redirect::Pty) => true,
            _ => false,
        }
    }
}

/// Descriptor specification of an external command, ordered by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorSpec {
    values: BTreeMap<usize, Redirect>,
}

impl DescriptorSpec {
    pub fn new() -> DescriptorSpec {
        DescriptorSpec::default()
    }

    /// Pipes for stdin (child reads), stdout and stderr (child writes).
    pub fn standard() -> DescriptorSpec {
        DescriptorSpec::new()
            .set_pipe(STDIN_ID, false)
            .set_pipe(STDOUT_ID, true)
            .set_pipe(STDERR_ID, true)
    }

    pub fn set(mut self, index: usize, redirect: Redirect) -> DescriptorSpec {
        self.values.insert(index, redirect);
        self
    }

    /// A pipe the child writes to when `write` is set, reads from otherwise.
    pub fn set_pipe(self, index: usize, write: bool) -> DescriptorSpec {
        let mode = if write { PipeMode::Write } else { PipeMode::Read };
        self.set(index, Redirect::Pipe(mode))
    }

    pub fn set_file<P: Into<PathBuf>>(self, index: usize, path: P, mode: &str) -> DescriptorSpec {
        self.set(
            index,
            Redirect::File {
                path: path.into(),
                mode: mode.to_string(),
            },
        )
    }

    pub fn set_resource<F: Into<OwnedFd>>(self, index: usize, fd: F) -> DescriptorSpec {
        self.set(index, Redirect::Resource(Arc::new(fd.into())))
    }

    pub fn set_pty(self, index: usize) -> DescriptorSpec {
        self.set(index, Redirect::Pty)
    }

    pub fn get(&self, index: usize) -> Option<&Redirect> {
        self.values.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Redirect)> {
        self.values.iter().map(|(index, redirect)| (*index, redirect))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Translates an `fopen`-style mode into open options.
///
/// `r` reads, `w` truncates or creates, `a` appends, `x` creates exclusively
/// and `c` creates without truncating. `+` adds the missing direction, `b`
/// and `t` are accepted and ignored.
pub fn open_options(mode: &str) -> Option<OpenOptions> {
    let mut chars = mode.chars();
    let mut options = OpenOptions::new();

    match chars.next()? {
        'r' => options.read(true),
        'w' => options.write(true).create(true).truncate(true),
        'a' => options.append(true).create(true),
        'x' => options.write(true).create_new(true),
        'c' => options.write(true).create(true),
        _ => return None,
    };

    for c in chars {
        match c {
            '+' => {
                options.read(true).write(true);
            }
            'b' | 't' => {}
            _ => return None,
        }
    }

    Some(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_specification() {
        let spec = DescriptorSpec::standard();
        assert_eq!(spec.get(0), Some(&Redirect::Pipe(PipeMode::Read)));
        assert_eq!(spec.get(1), Some(&Redirect::Pipe(PipeMode::Write)));
        assert_eq!(spec.get(2), Some(&Redirect::Pipe(PipeMode::Write)));
        assert_eq!(spec.len(), 3);
    }

    #[test]
    fn mixed_specification_is_ordered() {
        let file = tempfile::tempfile().unwrap();
        let spec = DescriptorSpec::new()
            .set_pty(4)
            .set_pipe(0, true)
            .set_file(2, "/tmp/file.txt", "wb")
            .set_resource(5, file)
            .set_pipe(1, false);

        let indexes: Vec<usize> = spec.iter().map(|(index, _)| index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 4, 5]);
        assert_eq!(spec.get(0), Some(&Redirect::Pipe(PipeMode::Write)));
        assert_eq!(spec.get(1), Some(&Redirect::Pipe(PipeMode::Read)));
        assert_eq!(
            spec.get(2),
            Some(&Redirect::File {
                path: "/tmp/file.txt".into(),
                mode: "wb".into()
            })
        );
        assert_eq!(spec.get(4), Some(&Redirect::Pty));
        assert!(matches!(spec.get(5), Some(Redirect::Resource(_))));
        assert_eq!(spec.get(3), None);
    }

    #[test]
    fn later_setting_wins() {
        let spec = DescriptorSpec::standard().set_file(1, "/dev/null", "w");
        assert!(matches!(spec.get(1), Some(Redirect::File { .. })));
    }

    #[test]
    fn file_modes() {
        assert!(open_options("r").is_some());
        assert!(open_options("rb").is_some());
        assert!(open_options("w+").is_some());
        assert!(open_options("a").is_some());
        assert!(open_options("").is_none());
        assert!(open_options("q").is_none());
        assert!(open_options("rz").is_none());
    }
}
