//! stackctl - control plane for the QLORAX container stack
//!
//! Wraps `docker compose` with lifecycle sequencing, health waits, profile
//! selection and snapshots of persistent state.
//!
//! ## Commands
//!
//! - `setup [profile]`: build images, start services, wait for health
//! - `start [profile]` / `stop` / `restart`: lifecycle
//! - `status`: per-service state plus one probe of the API
//! - `backup [dirs..]` / `restore <id>` / `backups`: snapshots
//! - `train` / `demo` / `shell`: one-off work inside the API container

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use stackctl_core::{
    BackupManager, HealthProber, HttpProbe, LifecycleController, ProfileComposer, RestartOutcome,
    SnapshotSummary, StackConfig, StackError, StartReport, StatusReport, StopOutcome,
};
use stackctl_engine::{ComposeEngine, ContainerEngine};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "stackctl")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operational control plane for the QLORAX container stack", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root: compose runs here and backed-up directories live here
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Compose file (relative to the project root)
    #[arg(long, global = true, env = "QLORAX_COMPOSE_FILE")]
    compose_file: Option<PathBuf>,

    /// Compose project name
    #[arg(long, global = true, env = "QLORAX_PROJECT")]
    project_name: Option<String>,

    /// Published API port (QLORAX_API_PORT is read with the rest of the environment)
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    api_port: Option<u16>,

    /// Published UI port (QLORAX_UI_PORT is read with the rest of the environment)
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    ui_port: Option<u16>,

    /// Snapshot root (relative to the project root)
    #[arg(long, global = true, env = "QLORAX_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Reject profiles that are not in the local registry
    #[arg(long, global = true)]
    strict_profiles: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build images, start services and wait for them to become healthy
    Setup {
        /// Profile to start (default, dev, monitoring, full)
        profile: Option<String>,
    },

    /// Start services for a profile and wait for health
    Start {
        /// Profile to start (default, dev, monitoring, full)
        profile: Option<String>,
    },

    /// Stop all services
    Stop,

    /// Restart running services, or start them if nothing is running
    Restart,

    /// Show service state and probe the API once
    Status {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show service logs
    Logs {
        /// Service to show (default: all)
        service: Option<String>,

        /// Keep streaming
        #[arg(short, long)]
        follow: bool,
    },

    /// Build images
    Build,

    /// Run the training job in a one-off API container
    Train {
        /// Extra arguments for the training script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run the demo pipeline in a one-off API container
    Demo {
        /// Extra arguments for the demo script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Open a shell in the running API container
    Shell,

    /// Snapshot persistent directories
    Backup {
        /// Directories to capture (default: data models outputs configs)
        dirs: Vec<String>,
    },

    /// Stop services and restore a snapshot
    Restore {
        /// Snapshot id (YYYYMMDD_HHMMSS)
        id: String,
    },

    /// List snapshots
    Backups {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Remove containers, volumes and locally built images
    Cleanup,

    /// Show engine and configuration details
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stackctl_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", describe_error(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = build_config(&cli);

    match cli.command {
        Commands::Setup { profile } => {
            let report = controller(&config)?.setup(profile.as_deref()).await?;
            print_start_report(&report, &config);
        }
        Commands::Start { profile } => {
            let report = controller(&config)?.start(profile.as_deref()).await?;
            print_start_report(&report, &config);
        }
        Commands::Stop => match controller(&config)?.stop().await? {
            StopOutcome::Stopped => println!("Services stopped"),
            StopOutcome::AlreadyStopped => println!("Services already stopped"),
        },
        Commands::Restart => match controller(&config)?.restart().await? {
            RestartOutcome::InPlace => println!("Services restarted"),
            RestartOutcome::Recreated(report) => print_start_report(&report, &config),
        },
        Commands::Status { format } => {
            let report = controller(&config)?.status().await?;
            print_formatted(&report, format, render_status)?;
        }
        Commands::Logs { service, follow } => {
            controller(&config)?.logs(service.as_deref(), follow).await?;
        }
        Commands::Build => {
            controller(&config)?.build().await?;
            println!("Images built");
        }
        Commands::Train { args } => {
            return Ok(exit_code(controller(&config)?.train(&args).await?));
        }
        Commands::Demo { args } => {
            return Ok(exit_code(controller(&config)?.demo(&args).await?));
        }
        Commands::Shell => {
            return Ok(exit_code(controller(&config)?.shell().await?));
        }
        Commands::Backup { dirs } => cmd_backup(&config, &dirs)?,
        Commands::Restore { id } => cmd_restore(&config, &id).await?,
        Commands::Backups { format } => {
            let snapshots = BackupManager::new(&config)
                .list()
                .context("Failed to list snapshots")?;
            print_formatted(&snapshots, format, |s| render_snapshots(s))?;
        }
        Commands::Cleanup => {
            controller(&config)?.cleanup().await?;
            println!("Containers, volumes and local images removed");
        }
        Commands::Info => cmd_info(&config).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Environment first, then flags.
fn build_config(cli: &Cli) -> StackConfig {
    let mut config = StackConfig::from_env().with_project_dir(cli.project_dir.clone());
    if let Some(file) = &cli.compose_file {
        config.compose_file = file.clone();
    }
    if let Some(name) = &cli.project_name {
        config.project_name = name.clone();
    }
    if let Some(port) = cli.api_port {
        config.api_port = port;
    }
    if let Some(port) = cli.ui_port {
        config.ui_port = port;
    }
    if let Some(dir) = &cli.backup_dir {
        config.backup_root = dir.clone();
    }
    config.strict_profiles |= cli.strict_profiles;
    config
}

fn controller(config: &StackConfig) -> Result<LifecycleController> {
    let engine: Arc<dyn ContainerEngine> = Arc::new(ComposeEngine::new(config.compose_config()));
    let probe = HttpProbe::new(config.probe_timeout).context("Failed to build HTTP client")?;
    Ok(LifecycleController::new(
        config.clone(),
        engine,
        HealthProber::new(Arc::new(probe)),
    ))
}

/// `[FATAL] ...` / `[WARN] ...` for stack errors; anything else is fatal.
fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StackError>() {
        Some(stack) => format!("[{}] {err}", stack.severity()),
        None => format!("[FATAL] {err:#}"),
    }
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

fn print_formatted<T, F>(value: &T, format: Format, render: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: Fn(&T) -> String,
{
    match format {
        Format::Text => print!("{}", render(value)),
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_start_report(report: &StartReport, config: &StackConfig) {
    print!("{}", render_start_report(report, config));
    // Health timeouts are warnings: reported, never an exit status.
    for warning in report.warnings() {
        eprintln!("{}", warning.tagged());
    }
}

fn render_start_report(report: &StartReport, config: &StackConfig) -> String {
    let mut out = format!(
        "Started profile '{}': {}\n",
        report.profile,
        report.started.join(", ")
    );
    for result in &report.health {
        let verdict = if result.is_ready() {
            "ready"
        } else {
            "not responding"
        };
        out.push_str(&format!(
            "  {:<16} {} after {} attempt(s) ({}s)\n",
            result.service(),
            verdict,
            result.attempts_used(),
            result.elapsed().as_secs()
        ));
    }
    out.push_str(&format!(
        "API: http://{}:{}\nUI:  http://{}:{}\n",
        config.probe_host, config.api_port, config.probe_host, config.ui_port
    ));
    out
}

fn render_status(report: &StatusReport) -> String {
    let mut out = format!("{:<16} {:<6} STATE\n", "SERVICE", "UP");
    for service in &report.services {
        out.push_str(&format!(
            "{:<16} {:<6} {}\n",
            service.service,
            if service.up { "yes" } else { "no" },
            service.state
        ));
    }
    out.push_str(&format!(
        "\n{}/{} services running\nAPI health ({}): {}\n",
        report.running_count(),
        report.services.len(),
        report.primary_endpoint,
        report.primary_probe
    ));
    out
}

fn render_snapshots(snapshots: &[SnapshotSummary]) -> String {
    if snapshots.is_empty() {
        return "No snapshots\n".to_string();
    }
    let mut out = String::new();
    for snapshot in snapshots {
        let files = snapshot
            .file_count
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        out.push_str(&format!(
            "{}  files={:<6} {}\n",
            snapshot.id,
            files,
            snapshot.directories.join(" ")
        ));
    }
    out
}

fn render_profiles(composer: &ProfileComposer) -> String {
    let mut out = String::from("Profiles:\n");
    for profile in composer.profiles() {
        let members: Vec<&str> = profile.members().iter().map(|s| s.name()).collect();
        out.push_str(&format!("  {:<12} {}\n", profile.name(), members.join(", ")));
    }
    out
}

fn cmd_backup(config: &StackConfig, dirs: &[String]) -> Result<()> {
    let manager = BackupManager::new(config);
    let snapshot = if dirs.is_empty() {
        manager.snapshot()?
    } else {
        manager.snapshot_dirs(dirs)?
    };

    println!("Snapshot: {}", snapshot.id());
    println!("Path: {}", snapshot.dest_path().display());
    println!("Directories: {}", snapshot.manifest().directories.join(", "));
    println!("Files: {}", snapshot.file_count());
    Ok(())
}

async fn cmd_restore(config: &StackConfig, id: &str) -> Result<()> {
    let manager = BackupManager::new(config);
    let mut ctl = controller(config)?;
    let restored = manager.restore(id, &mut ctl).await?;

    println!("Restored {id}: {}", restored.join(", "));
    println!("Services are stopped; run `stackctl start` to bring them back");
    Ok(())
}

async fn cmd_info(config: &StackConfig) -> Result<()> {
    println!("stackctl {}", stackctl_core::VERSION);
    println!("==============");

    let engine = ComposeEngine::new(config.compose_config());
    match engine.check_available().await {
        Ok(engine_info) => {
            info!(variant = %engine_info.variant, "container engine available");
            println!("Engine: {} {}", engine_info.variant, engine_info.version);
        }
        Err(err) => println!("Engine: unavailable ({err})"),
    }
    print!("{}", render_profiles(&ProfileComposer::new(config)));
    println!();
    println!("Configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stackctl_core::{HealthProbe, LifecyclePhase, ProbeOutcome, ServiceStatus};
    use stackctl_engine::fakes::RecordingEngine;

    struct DownProbe;

    #[async_trait]
    impl HealthProbe for DownProbe {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            ProbeOutcome::Unreachable {
                reason: "connection refused".to_string(),
            }
        }
    }

    #[test]
    fn test_parse_start_with_profile() {
        let cli = Cli::try_parse_from(["stackctl", "start", "monitoring"]).unwrap();
        match cli.command {
            Commands::Start { profile } => assert_eq!(profile.as_deref(), Some("monitoring")),
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_parse_train_keeps_trailing_args() {
        let cli = Cli::try_parse_from(["stackctl", "train", "resume", "--epochs", "3"]).unwrap();
        match cli.command {
            Commands::Train { args } => assert_eq!(args, ["resume", "--epochs", "3"]),
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_restore_requires_an_id() {
        assert!(Cli::try_parse_from(["stackctl", "restore"]).is_err());
    }

    #[test]
    fn test_port_zero_is_rejected_like_the_environment() {
        assert!(Cli::try_parse_from(["stackctl", "--api-port", "0", "status"]).is_err());
        assert!(Cli::try_parse_from(["stackctl", "--ui-port", "0", "status"]).is_err());

        let cli = Cli::try_parse_from(["stackctl", "status"]).unwrap();
        assert_eq!(cli.api_port, None);
        assert_eq!(cli.ui_port, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["stackctl", "status", "--verbose", "--format", "json"])
            .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Status { format: Format::Json }));
    }

    #[test]
    fn test_flags_override_config() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "stackctl",
            "--project-dir",
            tmp.path().to_str().unwrap(),
            "--api-port",
            "18000",
            "--strict-profiles",
            "backups",
        ])
        .unwrap();

        let config = build_config(&cli);

        assert_eq!(config.project_dir, tmp.path());
        assert_eq!(config.api_port, 18000);
        assert!(config.strict_profiles);
        assert_eq!(config.backup_root_path(), tmp.path().join("backups"));
    }

    #[test]
    fn test_describe_error_tags_severity() {
        let fatal = anyhow::Error::new(StackError::InvalidSnapshotId("x".to_string()));
        assert!(describe_error(&fatal).starts_with("[FATAL]"));

        let warning = anyhow::Error::new(StackError::HealthTimeout {
            service: "qlorax-api".to_string(),
            attempts: 60,
            elapsed_secs: 120,
        });
        assert!(describe_error(&warning).starts_with("[WARN]"));

        assert!(describe_error(&anyhow::anyhow!("boom")).starts_with("[FATAL] boom"));
    }

    #[test]
    fn test_exit_code_passthrough() {
        let debug = |code: ExitCode| format!("{code:?}");
        assert_eq!(debug(exit_code(0)), debug(ExitCode::SUCCESS));
        assert_eq!(debug(exit_code(3)), debug(ExitCode::from(3)));
        assert_eq!(debug(exit_code(-1)), debug(ExitCode::FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_report_lists_timeouts() {
        let config = StackConfig::default();
        let mut ctl = LifecycleController::new(
            config.clone(),
            Arc::new(RecordingEngine::new()),
            HealthProber::new(Arc::new(DownProbe)),
        );
        let report = ctl.start(None).await.unwrap();

        let text = render_start_report(&report, &config);

        assert!(text.starts_with("Started profile 'default': qlorax-api, qlorax-ui\n"));
        assert!(text.contains("qlorax-api       not responding after 60 attempt(s) (120s)"));
        assert!(text.contains("API: http://localhost:8000"));
        assert_eq!(report.warnings().len(), 2);
    }

    #[test]
    fn test_render_status_table() {
        let report = StatusReport {
            phase: LifecyclePhase::Uninitialized,
            services: vec![
                ServiceStatus {
                    service: "qlorax-api".to_string(),
                    up: true,
                    state: "running".to_string(),
                },
                ServiceStatus {
                    service: "qlorax-ui".to_string(),
                    up: false,
                    state: "absent".to_string(),
                },
            ],
            primary_endpoint: "http://localhost:8000/health".to_string(),
            primary_probe: ProbeOutcome::from_status(200),
        };

        let text = render_status(&report);

        assert!(text.contains("qlorax-api       yes    running"));
        assert!(text.contains("qlorax-ui        no     absent"));
        assert!(text.contains("1/2 services running"));
        assert!(text.contains("healthy (200)"));
    }

    #[test]
    fn test_render_profiles_lists_members() {
        let out = render_profiles(&ProfileComposer::new(&StackConfig::default()));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Profiles:");
        assert_eq!(lines[1], "  default      qlorax-api, qlorax-ui");
        assert_eq!(
            lines[4],
            "  monitoring   qlorax-api, qlorax-ui, prometheus, grafana"
        );
    }

    #[test]
    fn test_render_snapshots() {
        assert_eq!(render_snapshots(&[]), "No snapshots\n");
        let text = render_snapshots(&[SnapshotSummary {
            id: "20240309_070501".to_string(),
            directories: vec!["data".to_string(), "models".to_string()],
            file_count: None,
        }]);
        assert_eq!(text, "20240309_070501  files=-      data models\n");
    }
}
