use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub async fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let worker = args.worker.to_config();
    let mut checks = vec![worker_version_check(&worker.program, args.min_version).await];
    checks.extend(worker_args_check(&worker.args));
    checks.push(signal_support_check());
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };
    let output = DoctorOutput { checks, overall };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("voxmux doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
    }
}

/// Runs `<program> --version` and compares the major version.
async fn worker_version_check(program: &Path, min_version: u64) -> CheckResult {
    const NAME: &str = "worker_version";

    let version = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(VERSION_CHECK_TIMEOUT, version).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return CheckResult::new(
                NAME,
                CheckStatus::Fail,
                format!("cannot run {}: {err}", program.display()),
            )
        }
        Err(_) => {
            return CheckResult::new(
                NAME,
                CheckStatus::Fail,
                format!("{} --version did not answer within {VERSION_CHECK_TIMEOUT:?}", program.display()),
            )
        }
    };

    let reported = String::from_utf8_lossy(&output.stdout).trim().to_string();
    match parse_major_version(&reported) {
        Some(major) if major >= min_version => CheckResult::new(
            NAME,
            CheckStatus::Pass,
            format!("{} {reported}", program.display()),
        ),
        Some(_) => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("{} {reported} is older than {min_version}", program.display()),
        ),
        None => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("unrecognized version output {reported:?}"),
        ),
    }
}

/// The first leading argument is usually the worker script.
fn worker_args_check(args: &[String]) -> Option<CheckResult> {
    let entrypoint = args.first()?;
    let path = Path::new(entrypoint);
    if path.extension().is_none() {
        return None;
    }
    Some(if path.is_file() {
        CheckResult::new("worker_entrypoint", CheckStatus::Pass, entrypoint.clone())
    } else {
        CheckResult::new(
            "worker_entrypoint",
            CheckStatus::Warn,
            format!("{entrypoint} not found relative to the current directory"),
        )
    })
}

fn signal_support_check() -> CheckResult {
    #[cfg(unix)]
    {
        CheckResult::new(
            "signal_support",
            CheckStatus::Pass,
            "SIGINT available for graceful worker stop",
        )
    }

    #[cfg(not(unix))]
    {
        CheckResult::new(
            "signal_support",
            CheckStatus::Warn,
            "no interrupt signal on this platform, workers are always killed",
        )
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

/// `v18.17.1` and `18.17.1` both yield 18.
fn parse_major_version(text: &str) -> Option<u64> {
    let text = text.lines().next()?.trim();
    let text = text.strip_prefix('v').unwrap_or(text);
    text.split('.').next()?.parse().ok()
}
