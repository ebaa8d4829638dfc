//! rollguard - Entry Point
//!
//! Promotes a new container image behind a health gate, watches it for a
//! while, and puts the previous instance back when anything goes wrong.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use rollguard::app::options::{AppOptions, Overrides};
use rollguard::app::run::{load_settings, run_cleanup, run_deploy, run_rollback};
use rollguard::errors::DeployError;
use rollguard::logs::{init_logging, LogLevel, LogOptions};
use rollguard::models::deployment::{
    version_from_image, DeploymentRequest, PortMapping, PromotionMode, VolumeMapping,
};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// rollguard - health-gated deployments with automatic rollback
#[derive(Parser, Debug)]
#[command(name = "rollguard")]
#[command(version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Also write logs to <DIR>/rollguard.log
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Settings file (defaults to <deploy-path>/rollguard.json when present)
    #[arg(long, global = true, env = "ROLLGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Run every runtime, backup and metadata command over ssh on this host
    #[arg(long, global = true, value_name = "USER@HOST")]
    ssh: Option<String>,

    /// Extra ssh -o option, repeatable
    #[arg(long = "ssh-option", global = true, value_name = "OPTION")]
    ssh_options: Vec<String>,

    /// Docker binary
    #[arg(long, global = true)]
    docker_bin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up, promote, verify, monitor; roll back on failure
    Deploy(DeployArgs),

    /// Reinstate the previous instance and restore the latest backup
    Rollback {
        /// Canonical instance name
        #[arg(long)]
        name: String,

        /// Root of the deployment on the target host
        #[arg(long)]
        deploy_path: PathBuf,

        /// Compose mode, with the compose file (relative to the deploy path)
        #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "docker-compose.yml")]
        compose: Option<PathBuf>,
    },

    /// Remove leftover candidate and previous instances
    Cleanup {
        /// Canonical instance name
        #[arg(long)]
        name: String,

        /// Also prune dangling images
        #[arg(long)]
        prune_images: bool,

        /// Root of the deployment; required in compose mode
        #[arg(long)]
        deploy_path: Option<PathBuf>,

        /// Compose mode, with the compose file (relative to the deploy path)
        #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "docker-compose.yml", requires = "deploy_path")]
        compose: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Image reference to deploy
    #[arg(long)]
    image: String,

    /// Canonical instance name
    #[arg(long)]
    name: String,

    /// Port mapping HOST:CONTAINER, repeatable
    #[arg(long = "port", required = true)]
    ports: Vec<PortMapping>,

    /// Root of the deployment on the target host
    #[arg(long)]
    deploy_path: PathBuf,

    /// Target environment label
    #[arg(long, default_value = "production")]
    environment: String,

    /// Version identifier to record (defaults to the image tag or digest)
    #[arg(long)]
    version_id: Option<String>,

    /// Base URL for health checks (defaults to http://localhost:<first host port>)
    #[arg(long)]
    health_url: Option<String>,

    /// Health endpoint path
    #[arg(long)]
    health_endpoint: Option<String>,

    /// Compose mode, with the compose file (relative to the deploy path)
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "docker-compose.yml")]
    compose: Option<PathBuf>,

    /// Environment variable KEY=VALUE for the instance, repeatable
    #[arg(long = "env", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Extra volume SOURCE:TARGET, repeatable
    #[arg(long = "volume")]
    volumes: Vec<VolumeMapping>,

    /// Data file name under <deploy-path>/data
    #[arg(long)]
    data_file: Option<String>,

    /// Mount point of the data directory inside the instance
    #[arg(long)]
    data_mount: Option<String>,

    /// Startup health check attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds between failed startup health checks
    #[arg(long)]
    interval: Option<u64>,

    /// Per-request health check timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Monitoring window in minutes (0 disables monitoring)
    #[arg(long)]
    monitor_minutes: Option<u64>,

    /// Seconds between monitoring checks
    #[arg(long)]
    monitor_interval: Option<u64>,

    /// Consecutive monitoring failures that trigger a rollback
    #[arg(long)]
    max_failures: Option<u32>,

    /// Backups to keep
    #[arg(long)]
    retention: Option<usize>,

    /// Print the deployment report as JSON on stdout
    #[arg(long)]
    json_report: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            docker_bin: self.docker_bin.clone(),
            ssh_target: self.ssh.clone(),
            ssh_options: self.ssh_options.clone(),
            ..Default::default()
        };
        if let Commands::Deploy(args) = &self.command {
            overrides.health_endpoint = args.health_endpoint.clone();
            overrides.max_attempts = args.max_attempts;
            overrides.interval_secs = args.interval;
            overrides.timeout_secs = args.timeout;
            overrides.monitor_minutes = args.monitor_minutes;
            overrides.monitor_interval_secs = args.monitor_interval;
            overrides.max_consecutive_failures = args.max_failures;
            overrides.retention = args.retention;
            overrides.data_file = args.data_file.clone();
            overrides.data_mount = args.data_mount.clone();
        }
        overrides
    }

    fn deploy_path(&self) -> Option<&PathBuf> {
        match &self.command {
            Commands::Deploy(args) => Some(&args.deploy_path),
            Commands::Rollback { deploy_path, .. } => Some(deploy_path),
            Commands::Cleanup { deploy_path, .. } => deploy_path.as_ref(),
        }
    }
}

fn promotion_mode(compose: &Option<PathBuf>) -> PromotionMode {
    match compose {
        Some(file) => PromotionMode::Compose { file: file.clone() },
        None => PromotionMode::Container,
    }
}

impl DeployArgs {
    fn into_request(self) -> DeploymentRequest {
        let health_base_url = self.health_url.unwrap_or_else(|| {
            let port = self.ports.first().map(|p| p.host).unwrap_or(80);
            format!("http://localhost:{}", port)
        });
        DeploymentRequest {
            environment: self.environment,
            version: self
                .version_id
                .unwrap_or_else(|| version_from_image(&self.image)),
            image: self.image,
            name: self.name,
            ports: self.ports,
            volumes: self.volumes,
            env: self.env,
            deploy_path: self.deploy_path,
            health_base_url,
            mode: promotion_mode(&self.compose),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Settings come first: they carry the default log level. The deploy
    // path is only searched when it is on this machine.
    let local_deploy_path = match cli.ssh {
        Some(_) => None,
        None => cli.deploy_path().map(|p| p.as_path()),
    };
    let settings = match load_settings(cli.config.as_deref(), local_deploy_path).await {
        Ok(settings) => cli.overrides().apply(settings),
        Err(e) => {
            eprintln!("{} {}", "[FAILED]".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    };

    let log_options = LogOptions {
        log_level: cli.log_level.clone().unwrap_or_else(|| settings.log_level.clone()),
        log_dir: cli.log_dir.clone(),
        json_format: cli.log_json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = match AppOptions::from_settings(&settings) {
        Ok(options) => options,
        Err(e) => fail(e),
    };

    let result = match cli.command {
        Commands::Deploy(args) => deploy(&options, args).await,
        Commands::Rollback {
            name,
            deploy_path,
            compose,
        } => run_rollback(&options, &name, &deploy_path, &promotion_mode(&compose))
            .await
            .map(|summary| {
                info!(
                    "Rolled back {} (backup restored: {})",
                    name,
                    summary.restored_backup.as_deref().unwrap_or("none")
                );
            }),
        Commands::Cleanup {
            name,
            prune_images,
            deploy_path,
            compose,
        } => run_cleanup(
            &options,
            &name,
            deploy_path.as_deref(),
            &promotion_mode(&compose),
            prune_images,
        )
        .await
        .map(|report| {
            info!(
                "Cleanup removed {} instance(s), {} failure(s)",
                report.removed.len(),
                report.failures.len()
            );
        }),
    };

    match result {
        Ok(()) => println!("{}", "[SUCCESS]".green().bold()),
        Err(e) => fail(e),
    }
}

async fn deploy(options: &AppOptions, args: DeployArgs) -> Result<(), DeployError> {
    let json_report = args.json_report;
    let report = run_deploy(options, args.into_request()).await?;

    if json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    report.into_result().map(|_| ())
}

fn fail(e: DeployError) -> ! {
    error!("{}", e);
    let banner = match &e {
        DeployError::RollbackExhausted(_) => "[FAILED] manual intervention required",
        DeployError::RolledBack(_) => "[FAILED] rolled back",
        e if e.is_before_mutation() => "[FAILED] nothing was changed",
        _ => "[FAILED]",
    };
    eprintln!("{}", banner.red().bold());
    std::process::exit(e.exit_code());
}
