use crate::linux::error::{Error, Result};
use crate::linux::external::{DescriptorSpec, PipeMode, Redirect};
use crate::linux::system::NULL_DEVICE;
use crate::process::STDIN_ID;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessOptions,

    #[serde(default)]
    pub supervisor: SupervisorOptions,

    #[serde(default)]
    pub external: ExternalOptions,

    #[serde(default)]
    pub daemon: Option<DaemonOptions>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProcessOptions {
    #[serde(default, alias = "cwd")]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub command: Option<String>,

    // empty: inherit the environment of the supervisor
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SupervisorOptions {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    150
}

fn default_total_timeout_secs() -> u64 {
    300
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisorOptions {
            poll_interval_ms: default_poll_interval_ms(),
            total_timeout_secs: default_total_timeout_secs(),
        }
    }
}

impl SupervisorOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExternalOptions {
    #[serde(default = "default_terminate_timeout_secs")]
    pub terminate_timeout_secs: u64,

    /// Descriptors not listed are inherited from the supervisor.
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
}

fn default_terminate_timeout_secs() -> u64 {
    5
}

impl Default for ExternalOptions {
    fn default() -> Self {
        ExternalOptions {
            terminate_timeout_secs: default_terminate_timeout_secs(),
            descriptors: Vec::new(),
        }
    }
}

impl ExternalOptions {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    pub fn descriptor_spec(&self) -> DescriptorSpec {
        self.descriptors
            .iter()
            .fold(DescriptorSpec::new(), |spec, descriptor| {
                spec.set(descriptor.index, descriptor.redirect())
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Pipe,
    File,
    Pty,
    Null,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Descriptor {
    pub index: usize,

    #[serde(alias = "type")]
    pub kind: DescriptorKind,

    /// `r` or `w` for pipes, an `fopen` mode for files. Defaults to reading
    /// for stdin and writing otherwise.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Descriptor {
    fn default_mode(&self) -> &str {
        if self.index == STDIN_ID {
            "r"
        } else {
            "w"
        }
    }

    fn mode(&self) -> &str {
        self.mode.as_deref().unwrap_or_else(|| self.default_mode())
    }

    pub fn redirect(&self) -> Redirect {
        match self.kind {
            DescriptorKind::Pipe => {
                if self.mode().starts_with('r') {
                    Redirect::Pipe(PipeMode::Read)
                } else {
                    Redirect::Pipe(PipeMode::Write)
                }
            }
            DescriptorKind::File => Redirect::File {
                path: self.path.clone().unwrap_or_default(),
                mode: self.mode().to_string(),
            },
            DescriptorKind::Null => Redirect::File {
                path: PathBuf::from(NULL_DEVICE),
                mode: self.mode().to_string(),
            },
            DescriptorKind::Pty => Redirect::Pty,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.kind == DescriptorKind::File && self.path.is_none() {
            return Err(Error::InvalidConfig(format!(
                "file descriptor {} needs a path",
                self.index
            )));
        }
        if self.kind == DescriptorKind::Pipe && !matches!(self.mode(), "r" | "w") {
            return Err(Error::InvalidConfig(format!(
                "pipe descriptor {} has mode {:?}, expected \"r\" or \"w\"",
                self.index,
                self.mode()
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DaemonOptions {
    pub pid_file: PathBuf,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        for descriptor in config.external.descriptors.iter() {
            descriptor.validate()?;
        }

        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;
        Config::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.process.command, None);
        assert!(config.process.env.is_empty());
        assert_eq!(config.supervisor.poll_interval(), Duration::from_millis(150));
        assert_eq!(config.supervisor.total_timeout(), Duration::from_secs(300));
        assert_eq!(config.external.terminate_timeout(), Duration::from_secs(5));
        assert!(config.external.descriptor_spec().is_empty());
        assert!(config.daemon.is_none());
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml_str(
            r#"
            [process]
            cwd = "/tmp"
            command = "cat"
            env = { LANG = "C" }

            [supervisor]
            poll_interval_ms = 20

            [external]
            terminate_timeout_secs = 1

            [[external.descriptors]]
            index = 0
            kind = "pipe"

            [[external.descriptors]]
            index = 1
            kind = "file"
            path = "/tmp/out.log"
            mode = "a"

            [[external.descriptors]]
            index = 2
            kind = "null"

            [[external.descriptors]]
            index = 3
            type = "pty"

            [daemon]
            pid_file = "/run/procvisor.pid"
            "#,
        )
        .unwrap();

        assert_eq!(config.process.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(config.process.command.as_deref(), Some("cat"));
        assert_eq!(config.process.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(config.supervisor.poll_interval_ms, 20);
        assert_eq!(config.supervisor.total_timeout_secs, 300);
        assert_eq!(config.external.terminate_timeout(), Duration::from_secs(1));
        assert_eq!(
            config.daemon.map(|daemon| daemon.pid_file),
            Some(PathBuf::from("/run/procvisor.pid"))
        );

        let spec = config.external.descriptor_spec();
        assert_eq!(spec.get(0), Some(&Redirect::Pipe(PipeMode::Read)));
        assert_eq!(
            spec.get(1),
            Some(&Redirect::File {
                path: "/tmp/out.log".into(),
                mode: "a".into()
            })
        );
        assert_eq!(
            spec.get(2),
            Some(&Redirect::File {
                path: NULL_DEVICE.into(),
                mode: "w".into()
            })
        );
        assert_eq!(spec.get(3), Some(&Redirect::Pty));
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let missing_path = "[[external.descriptors]]\nindex = 1\nkind = \"file\"\n";
        assert!(matches!(
            Config::from_toml_str(missing_path),
            Err(Error::InvalidConfig(_))
        ));

        let bad_mode = "[[external.descriptors]]\nindex = 1\nkind = \"pipe\"\nmode = \"rw\"\n";
        assert!(matches!(
            Config::from_toml_str(bad_mode),
            Err(Error::InvalidConfig(_))
        ));

        let unknown_kind = "[[external.descriptors]]\nindex = 1\nkind = \"socket\"\n";
        assert!(matches!(
            Config::from_toml_str(unknown_kind),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[process]\ncommand = \"sleep 1\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.process.command.as_deref(), Some("sleep 1"));
        assert!(matches!(
            Config::load("/nonexistent/procvisor.toml"),
            Err(Error::Io(_))
        ));
    }
}
