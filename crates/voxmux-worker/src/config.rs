use std::path::PathBuf;
use std::time::Duration;

/// Port the worker listens on when none is configured.
pub const DEFAULT_PORT: u16 = 6969;

/// Runtime used to launch the worker entrypoint.
pub const DEFAULT_PROGRAM: &str = "node";

/// Worker entrypoint, relative to the working directory.
pub const DEFAULT_ENTRYPOINT: &str = "dist/index.js";

/// Grace period between the interrupt and the forced kill.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Number of stderr lines retained for diagnostics.
pub const DEFAULT_STDERR_TAIL: usize = 64;

/// How to launch the worker.
///
/// The command line is `program [args..] port=<port> log_mode=<log_mode>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the `port=`/`log_mode=` settings.
    pub args: Vec<String>,
    /// Listening port handed to the worker.
    pub port: u16,
    /// Worker log verbosity. Empty means the worker default.
    pub log_mode: String,
    /// Working directory for the child. Defaults to the current directory.
    pub working_dir: Option<PathBuf>,
    /// How many trailing stderr lines to keep.
    pub stderr_tail_lines: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            args: vec![DEFAULT_ENTRYPOINT.to_string()],
            port: DEFAULT_PORT,
            log_mode: String::new(),
            working_dir: None,
            stderr_tail_lines: DEFAULT_STDERR_TAIL,
        }
    }
}

impl WorkerConfig {
    /// Launch `program` with no leading arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Self::default()
        }
    }

    /// Replace the leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Override the listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the worker log verbosity.
    pub fn with_log_mode(mut self, log_mode: impl Into<String>) -> Self {
        self.log_mode = log_mode.into();
        self
    }

    /// Run the worker from `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Override the retained stderr line count.
    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    /// Full argument vector passed to `program`.
    pub fn launch_args(&self) -> Vec<String> {
        let mut out = self.args.clone();
        out.push(format!("port={}", self.port));
        out.push(format!("log_mode={}", self.log_mode));
        out
    }
}
