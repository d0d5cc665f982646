use std::path::PathBuf;
use std::process;

use clap::{arg, ArgMatches};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;
use config::{LoadConfig, Target};

mod error;
use error::LoadError;

mod expect;

mod loader;

mod remote;
use remote::Transport;

mod ssh;
use ssh::{MockSSH, SSH};

mod transfer;

mod progress_message;

mod output;


const DESC: &str = r#"Example: rload 10.0.0.5
Copies the SQL data directory to the database VM, then loads each file with the
database's batch runner, schema first. Stops at the first file that fails."#;

fn cli() -> clap::Command<'static> {
    clap::Command::new("rload host")
        .about(DESC)
        .arg(arg!(--"dry-run" "Show what we would do without doing it").required(false))
        .arg(arg!(-v --verbose "Debug level output").required(false))
        .arg(
            arg!(--user <USER> "SSH username on the database VM")
                .required(false)
                .default_value(config::DEFAULT_USERNAME),
        )
        // no clap default, Target::new already uses config::DEFAULT_PORT
        .arg(arg!(--port <PORT> "SSH port").required(false))
        .arg(
            arg!(--"db-name" <NAME> "Database to load into")
                .required(false)
                .default_value(config::DEFAULT_DB_NAME),
        )
        .arg(
            arg!(--client <CMD> "Batch SQL runner on the VM")
                .required(false)
                .default_value(config::DEFAULT_CLIENT),
        )
        .arg(
            arg!(--"data-dir" <DIR> "Local directory to copy [default: assets/oil_data next to this binary]")
                .required(false),
        )
        .arg(
            arg!(--"remote-dir" <DIR> "Where to copy the data directory to on the VM")
                .required(false)
                .default_value(config::DEFAULT_REMOTE_DIR),
        )
        // not required to clap, we print our own usage when it's missing
        .arg(arg!([host] "IP or hostname of the database VM").required(false))
}

fn main() {
    let args = cli().get_matches();
    let verbose = args.is_present("verbose");
    init_logging(verbose);

    let config = match config_from_args(&args) {
        Ok(c) => c,
        Err(err) => {
            match err.downcast_ref::<LoadError>() {
                Some(LoadError::Usage) => println!("{}", usage_text()),
                _ => println!("{err}"),
            }
            process::exit(1);
        }
    };
    debug!("{config:?}");

    let progress = |p| output::show(p, verbose);
    println!("Copying files to {}", config.target.host);
    let res = if args.is_present("dry-run") {
        let secret = config.target.db_password.clone();
        loader::run(
            &config,
            |_| Ok(Box::new(MockSSH::new(&secret)) as Box<dyn Transport>),
            &progress,
        )
    } else {
        loader::run(
            &config,
            |c| Ok(Box::new(SSH::new(&c.target, c.auth_timeout)?) as Box<dyn Transport>),
            &progress,
        )
    };

    match res {
        Ok(results) => {
            for r in results.iter().filter(|r| !r.output.is_empty()) {
                debug!("{} (exit code {}) said: {}", r.file, r.exit_code, r.output);
            }
        }
        Err(err) => {
            println!("An error occurred:");
            println!("{err}");
            process::exit(1);
        }
    }
}

fn config_from_args(args: &ArgMatches) -> anyhow::Result<LoadConfig> {
    let host = args.value_of("host").ok_or(LoadError::Usage)?;

    let mut target = Target::new(host);
    if let Some(user) = args.value_of("user") {
        target.username = user.to_string();
    }
    if let Some(port) = args.value_of("port") {
        target.port = port.parse()?;
    }
    if let Some(db_name) = args.value_of("db-name") {
        target.db_name = db_name.to_string();
    }

    let local_dir = match args.value_of("data-dir") {
        Some(d) => PathBuf::from(d),
        None => config::default_data_dir()?,
    };

    let mut config = LoadConfig::new(target, local_dir);
    if let Some(remote_dir) = args.value_of("remote-dir") {
        config.remote_dir = remote_dir.to_string();
    }
    if let Some(client) = args.value_of("client") {
        config.client = client.to_string();
    }
    Ok(config)
}

// What we print on stdout when the host is missing
fn usage_text() -> String {
    format!("{}\n{}", LoadError::Usage, cli().render_usage())
}

// Progress for the operator goes to stdout, this is diagnostics on stderr.
// RUST_LOG overrides -v.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
