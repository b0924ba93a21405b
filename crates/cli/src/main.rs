mod check_commands;
mod processors_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    homegw_config::{HomegwConfig, LogFormat, find_config_file, load_config},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "homegw", version, about = "homegw: natural-language command gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./homegw.{toml,yaml,yml,json}, then the user config dir).
    #[arg(short, long, global = true, env = "HOMEGW_CONFIG")]
    config: Option<PathBuf>,

    /// Processor definitions, file or directory (overrides config value).
    #[arg(long, global = true)]
    processors: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// List the processors defined under the processors path.
    Processors {
        /// Include disabled processors.
        #[arg(long)]
        all: bool,
    },
    /// Validate the configuration and processor files.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

/// Resolve and load the config file. No file means defaults; a file that
/// fails to load is an error.
fn load(cli: &Cli) -> anyhow::Result<(HomegwConfig, Option<PathBuf>)> {
    let path = cli.config.clone().or_else(find_config_file);
    let mut config = match &path {
        Some(p) => load_config(p).with_context(|| format!("failed to load {}", p.display()))?,
        None => HomegwConfig::default(),
    };
    apply_overrides(cli, &mut config);
    Ok((config, path))
}

fn apply_overrides(cli: &Cli, config: &mut HomegwConfig) {
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(processors) = &cli.processors {
        config.processors.path = processors.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.json_logs {
        config.log.format = LogFormat::Json;
    }
}

fn init_telemetry(config: &HomegwConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init(),
    }
}

fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "<defaults>".into(), |p| p.display().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `check` reports load failures as diagnostics instead of aborting.
    if let Some(Commands::Check { verbose }) = cli.command {
        return check_commands::check(cli.config.as_deref(), cli.processors.as_deref(), verbose);
    }

    let (config, config_path) = load(&cli)?;
    init_telemetry(&config);

    match cli.command {
        None | Some(Commands::Gateway) => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %display_path(config_path.as_deref()),
                "homegw starting"
            );
            let processors = config.processors.path.clone();
            homegw_gateway::start_gateway(config, processors).await
        },
        Some(Commands::Processors { all }) => {
            processors_commands::list(&config.processors.path, all)
        },
        Some(Commands::Check { .. }) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence_over_file_values() {
        let cli = Cli::try_parse_from([
            "homegw",
            "--bind",
            "0.0.0.0",
            "--port",
            "9090",
            "--processors",
            "/etc/homegw/processors",
            "--json-logs",
        ])
        .unwrap();
        let mut config = HomegwConfig::default();
        apply_overrides(&cli, &mut config);

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.processors.path, PathBuf::from("/etc/homegw/processors"));
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(cli.command.is_none());
    }

    #[test]
    fn explicit_config_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homegw.toml");
        std::fs::write(&path, "[server]\nport = 7070\n").unwrap();

        let cli = Cli::try_parse_from(["homegw", "--config", path.to_str().unwrap(), "gateway"])
            .unwrap();
        let (config, loaded_from) = load(&cli).unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(loaded_from.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn broken_config_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homegw.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let cli = Cli::try_parse_from(["homegw", "--config", path.to_str().unwrap()]).unwrap();
        let err = load(&cli).unwrap_err();
        assert!(err.to_string().contains("failed to load"));
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["homegw", "processors", "--all"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Processors { all: true })));

        let cli = Cli::try_parse_from(["homegw", "check", "--verbose"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check { verbose: true })));
    }
}
