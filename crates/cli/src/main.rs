mod check_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    calbridge_caldav::{CalendarService, ServerDetails, register_calendar_tools},
    calbridge_config::{CalBridgeConfig, Severity},
    calbridge_mcp::{McpServer, ToolRegistry},
    clap::{Parser, Subcommand},
    tokio::net::TcpListener,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

const SERVER_NAME: &str = "calbridge";

const INSTRUCTIONS: &str = "Tools for the iCloud calendar of the configured account. Start with \
     list_my_calendars or list_my_events. Event URLs returned by list_my_events and \
     create_my_event identify events for update_my_event and delete_my_event. Alarms cannot be \
     changed in place: use list_event_alarms, delete_my_event, then create_my_event with \
     alarm_configs.";

#[derive(Parser)]
#[command(
    name = "calbridge",
    version,
    about = "calbridge: iCloud calendar tools over MCP"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "CALBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server (default when no subcommand is provided).
    Serve,
    /// Validate the configuration and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
        /// Also log in to the CalDAV server and list calendars.
        #[arg(long)]
        connect: bool,
    },
    /// List the tools the server exposes.
    Tools,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// File (explicit or discovered), then environment, then CLI flags.
fn load_effective_config(cli: &Cli) -> anyhow::Result<CalBridgeConfig> {
    let mut config = match cli.config {
        Some(ref path) => calbridge_config::load_config(path)?,
        None => calbridge_config::discover_and_load(),
    };
    calbridge_config::apply_env_overrides(&mut config);
    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

fn build_registry(config: &CalBridgeConfig) -> anyhow::Result<(Arc<CalendarService>, ToolRegistry)> {
    let service = Arc::new(
        CalendarService::new(config.caldav.clone()).context("invalid CalDAV configuration")?,
    );
    let mut registry = ToolRegistry::new();
    register_calendar_tools(&mut registry, Arc::clone(&service), ServerDetails {
        name: SERVER_NAME.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        environment: config.environment.clone(),
    });
    Ok((service, registry))
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load_effective_config(cli)?;

    for d in calbridge_config::validate_effective(&config).diagnostics {
        match d.severity {
            Severity::Error | Severity::Warning => {
                warn!(path = %d.path, category = d.category, "{}", d.message)
            },
            Severity::Info => info!(path = %d.path, category = d.category, "{}", d.message),
        }
    }

    let (service, registry) = build_registry(&config)?;
    info!(tools = registry.len(), environment = %config.environment, "tools registered");

    if config.caldav.has_credentials() {
        match service.connection_status().await {
            Ok(status) => info!(
                account = %status.email,
                calendars = status.calendars_found,
                "connected to CalDAV server"
            ),
            Err(e) => warn!(
                kind = %e.kind(),
                error = %e,
                "startup connection check failed; tools will retry on demand"
            ),
        }
    } else {
        warn!("ICLOUD_EMAIL / ICLOUD_PASSWORD not set; calendar tools will report a configuration error");
    }

    let server = Arc::new(
        McpServer::new(SERVER_NAME, env!("CARGO_PKG_VERSION"), registry)
            .with_instructions(INSTRUCTIONS),
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    calbridge_mcp::serve(listener, server, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await?;
    Ok(())
}

fn list_tools(cli: &Cli) -> anyhow::Result<()> {
    let config = load_effective_config(cli)?;
    let (_, registry) = build_registry(&config)?;
    for def in registry.definitions() {
        println!("{}", def.name);
        if let Some(description) = def.description {
            println!("    {description}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "calbridge starting");

    match cli.command {
        None | Some(Commands::Serve) => serve(&cli).await,
        Some(Commands::Check { verbose, connect }) => {
            let config = load_effective_config(&cli)?;
            check_commands::check(cli.config.as_deref(), &config, verbose, connect).await
        },
        Some(Commands::Tools) => list_tools(&cli),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["calbridge", "--port", "9100"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9100));

        let cli = Cli::try_parse_from(["calbridge", "check", "--verbose"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Check {
                verbose: true,
                connect: false
            })
        ));
    }

    #[test]
    fn cli_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calbridge.toml");
        std::fs::write(&path, "environment = \"staging\"\n\n[server]\nport = 9000\n").unwrap();

        let cli = Cli::try_parse_from([
            "calbridge",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9443",
            "--bind",
            "127.0.0.1",
        ])
        .unwrap();
        let config = load_effective_config(&cli).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.bind, "127.0.0.1");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["calbridge", "--config", "/nonexistent/calbridge.toml"])
            .unwrap();
        assert!(load_effective_config(&cli).is_err());
    }

    #[test]
    fn registry_exposes_all_tools() {
        let (_, registry) = build_registry(&CalBridgeConfig::default()).unwrap();
        assert_eq!(registry.len(), 8);
        assert!(registry.get("get_server_info").is_some());
    }
}
