use clap::{App, Arg};
use procvisor::config::Config;
use procvisor::linux;
use procvisor::process::EXIT_FAILURE;
use std::path::PathBuf;

fn main() {
    let matches = App::new("procvisor")
        .author("huangyuhui <i@huangyuhui.net>")
        .about(
            "procvisor runs a command under a process supervisor and reports how it ended.

            To run a command and print its run report as JSON:

                $ procvisor -f <config-toml> -- <command>...

            Where \"<config-toml>\" is a file describing the working directory, environment
            and descriptors of the command. Pass -d to detach into a daemon first.
            ",
        )
        .arg(Arg::with_name("file").short("f").long("file").takes_value(true).help("a toml file that guides process configuration"))
        .arg(Arg::with_name("config").short("c").long("config").takes_value(true).help("pass toml configuration in command line"))
        .arg(Arg::with_name("daemon").short("d").long("daemon").help("detach and run the command in a daemon"))
        .arg(Arg::with_name("pid-file").long("pid-file").takes_value(true).help("pid file of the daemon, overrides [daemon] pid_file"))
        .arg(Arg::with_name("commands").multiple(true))
        .get_matches();

    if matches.value_of("file").is_some() && matches.value_of("config").is_some() {
        eprintln!("Options --file and --config must not appear together.");
        std::process::exit(EXIT_FAILURE)
    }

    let config = if let Some(file) = matches.value_of("file") {
        Config::load(file)
    } else if let Some(raw_config) = matches.value_of("config") {
        Config::from_toml_str(raw_config)
    } else {
        Ok(Config::default())
    };
    let mut config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(EXIT_FAILURE)
        }
    };

    if let Some(commands) = matches.values_of("commands") {
        config.process.command = Some(commands.collect::<Vec<_>>().join(" "));
    }
    if config.process.command.as_deref().map_or(true, |command| command.trim().is_empty()) {
        eprintln!("No command given.");
        std::process::exit(EXIT_FAILURE)
    }

    if !cfg!(target_os = "linux") {
        eprintln!("Unsupported operating system");
        std::process::exit(EXIT_FAILURE);
    }

    if matches.is_present("daemon") {
        let pid_file = matches
            .value_of("pid-file")
            .map(PathBuf::from)
            .or_else(|| config.daemon.as_ref().map(|daemon| daemon.pid_file.clone()));
        let pid_file = match pid_file {
            Some(pid_file) => pid_file,
            None => {
                eprintln!("A pid file is required in daemon mode.");
                std::process::exit(EXIT_FAILURE)
            }
        };

        if let Err(err) = linux::run_daemon(&config, &pid_file) {
            eprintln!("{}", err);
        }
        std::process::exit(EXIT_FAILURE)
    }

    linux::run(&config)
}
