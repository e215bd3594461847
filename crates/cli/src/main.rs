mod client_commands;
mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    async_trait::async_trait,
    clap::{Parser, Subcommand},
    loopgate_config::AutomationPaths,
    loopgate_gateway::{AutomationService, BOOTSTRAP_PATH},
    loopgate_service_traits::{
        BootstrapOutcome, BootstrapRequest, BootstrapService, ServiceResult,
    },
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "loopgate", about = "Loopgate: loopback automation endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Automation directory (overrides default ~/.config/loopgate/automation/).
    #[arg(long, global = true, env = "LOOPGATE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the endpoint in the foreground until Ctrl-C.
    Serve,
    /// Print whether the endpoint is enabled and running.
    Status,
    /// Persist `enabled = true` (requires at least one allowed root).
    Enable,
    /// Persist `enabled = false`.
    Disable,
    /// Add a directory to the allowed roots.
    Allow {
        /// Directory under which bootstrap requests may open sessions.
        dir: PathBuf,
    },
    /// Print the live credentials, if the endpoint is running.
    Credentials,
    /// Validate the config file and report errors/warnings.
    Check,
    /// Ask the running endpoint to open a session.
    Bootstrap {
        /// Working directory for the session (defaults to the current one).
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Command to type into the session; repeat for several.
        #[arg(long = "command", short = 'c', required = true)]
        commands: Vec<String>,
    },
}

/// Session collaborator for `serve`: logs what it would run and answers with
/// a fresh session id.
struct DryRunBootstrap;

#[async_trait]
impl BootstrapService for DryRunBootstrap {
    async fn bootstrap(&self, request: BootstrapRequest) -> ServiceResult<BootstrapOutcome> {
        let session_id = uuid::Uuid::new_v4().to_string();
        info!(
            %session_id,
            cwd = %request.cwd.display(),
            commands = ?request.commands,
            "dry-run bootstrap"
        );
        Ok(BootstrapOutcome::new(session_id))
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn automation_paths(cli: &Cli) -> anyhow::Result<AutomationPaths> {
    match cli.config_dir {
        Some(ref dir) => Ok(AutomationPaths::new(dir.clone())),
        None => AutomationPaths::discover().context("cannot locate the automation directory"),
    }
}

async fn serve(paths: AutomationPaths) -> anyhow::Result<()> {
    let service = AutomationService::new(paths, Arc::new(DryRunBootstrap));
    let status = service.start().await?;
    let Some(creds) = service.credentials().filter(|_| status.enabled) else {
        warn!("automation is disabled; run `loopgate allow <DIR>` and `loopgate enable` first");
        return Ok(());
    };

    eprintln!(
        "Listening on {}{BOOTSTRAP_PATH}\nCredentials: {}",
        creds.base_url(),
        service.paths().credentials_file.display()
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    service.stop().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let paths = automation_paths(&cli)?;
    match cli.command {
        Commands::Serve => {
            info!(version = env!("CARGO_PKG_VERSION"), "loopgate starting");
            serve(paths).await
        },
        Commands::Status => config_commands::status(&paths),
        Commands::Enable => config_commands::set_enabled(&paths, true),
        Commands::Disable => config_commands::set_enabled(&paths, false),
        Commands::Allow { dir } => config_commands::allow(&paths, &dir),
        Commands::Credentials => config_commands::credentials(&paths),
        Commands::Check => config_commands::check(&paths),
        Commands::Bootstrap { cwd, commands } => {
            client_commands::bootstrap(&paths, cwd, commands).await
        },
    }
}
