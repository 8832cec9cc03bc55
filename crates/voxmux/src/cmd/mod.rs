use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use voxmux_worker::WorkerConfig;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod doctor;
pub mod echo_worker;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a worker, send one command for a session and print the ack.
    Call(CallArgs),
    /// Run a loopback worker on stdin/stdout.
    EchoWorker(EchoWorkerArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format).await,
        Command::EchoWorker(args) => echo_worker::run(args).await,
        Command::Doctor(args) => doctor::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Which worker to launch.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Worker executable.
    #[arg(long, env = "VOXMUX_WORKER", value_name = "PROGRAM")]
    pub worker: Option<PathBuf>,
    /// Argument placed before the port/log settings (repeatable).
    #[arg(long = "worker-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,
}

impl WorkerArgs {
    /// `node dist/index.js` unless overridden.
    pub fn to_config(&self) -> WorkerConfig {
        let mut config = match &self.worker {
            Some(program) => WorkerConfig::new(program.clone()),
            None => WorkerConfig::default(),
        };
        if !self.worker_args.is_empty() {
            config = config.with_args(self.worker_args.iter().cloned());
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub worker: WorkerArgs,
    /// Port handed to the worker.
    #[arg(long, env = "VOXMUX_PORT", default_value_t = voxmux_worker::DEFAULT_PORT)]
    pub port: u16,
    /// Worker log verbosity.
    #[arg(long, env = "VOXMUX_LOG_MODE")]
    pub log_mode: Option<String>,
    /// Session id.
    #[arg(long, default_value = "cli")]
    pub sid: String,
    /// JSON object to send.
    pub payload: String,
    /// Maximum time to wait for the ack (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Keep printing status changes and events for this long after the ack.
    #[arg(long, value_name = "DURATION")]
    pub listen: Option<String>,
    /// Event names to print while listening (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "stream_changed")]
    pub events: Vec<String>,
    /// Grace period between interrupt and kill when stopping the worker.
    #[arg(long, default_value = "3s")]
    pub stop_timeout: String,
}

#[derive(Args, Debug)]
pub struct EchoWorkerArgs {
    /// Launch settings such as `port=6969` and `log_mode=debug`.
    pub settings: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub worker: WorkerArgs,
    /// Lowest acceptable major version reported by `<worker> --version`.
    #[arg(long, default_value_t = 15)]
    pub min_version: u64,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
