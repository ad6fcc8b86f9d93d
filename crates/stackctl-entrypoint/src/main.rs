//! stack-entrypoint - ENTRYPOINT of the QLORAX images
//!
//! `stack-entrypoint <token> [args..]` picks what the container runs:
//! `api` (default), `ui`, `train`, `demo`, `notebook`, `shell`, `health`,
//! `test`, or any other program verbatim. Everything but `health` replaces
//! this process.

use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use stackctl_core::{Command, HealthProbe, HttpProbe, LaunchPlan, StackConfig};
use tracing::{info, warn, Level};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    stackctl_core::init_tracing(false, Level::INFO);

    let config = StackConfig::from_env();
    let command = Command::from_args(utf8_args(std::env::args_os().skip(1))?);
    info!(token = %command.token, action = ?command.action, env = %config.environment, "dispatching");

    match command.plan(&config) {
        LaunchPlan::Probe { url } => probe_once(&url, &config).await,
        LaunchPlan::Exec { program, args } => launch(&program, &args),
    }
}

/// Arguments as UTF-8; anything else is reported instead of panicking.
fn utf8_args(args: impl IntoIterator<Item = OsString>) -> Result<Vec<String>> {
    args.into_iter()
        .map(|arg| {
            arg.into_string().map_err(|raw| {
                anyhow!("argument {:?} is not valid UTF-8", raw.to_string_lossy())
            })
        })
        .collect()
}

/// One GET; 2xx is success.
async fn probe_once(url: &str, config: &StackConfig) -> Result<ExitCode> {
    let probe = HttpProbe::new(config.probe_timeout).context("Failed to build HTTP client")?;
    let outcome = probe.probe(url).await;
    if outcome.is_healthy() {
        info!(url = %url, outcome = %outcome, "healthy");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(url = %url, outcome = %outcome, "unhealthy");
        Ok(ExitCode::FAILURE)
    }
}

/// Replace this process; returns only if the program could not be started.
#[cfg(unix)]
fn launch(program: &str, args: &[String]) -> Result<ExitCode> {
    use std::os::unix::process::CommandExt;

    let err = std::process::Command::new(program).args(args).exec();
    Err(err).with_context(|| format!("Failed to exec {program}"))
}

#[cfg(not(unix))]
fn launch(program: &str, args: &[String]) -> Result<ExitCode> {
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run {program}"))?;
    Ok(status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}
