//! XynqDB server entrypoint.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;

use xynq_config::{Config, ConfigLoadError};
use xynqdb::{server, signal};

const DEFAULT_CONFIG_PATH: &str = "./xynqdb.conf";

#[derive(Parser, Debug)]
#[command(name = "xynqdb", about = "XynqDB request-dispatch server")]
struct Cli {
    /// Configuration file (S-expression format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration overrides, e.g. --set tcp.listen-backlog=256
    /// (overrides values from the config file).
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => {
            // No config specified: try the default location, run with
            // defaults when it is absent, fail when it is malformed.
            match Config::load_from_file(Path::new(DEFAULT_CONFIG_PATH)) {
                Ok(config) => config,
                Err(ConfigLoadError::FileNotFound) => {
                    eprintln!(
                        "No config loaded. Will use defaults. Tried '{}' - but no file found.",
                        DEFAULT_CONFIG_PATH
                    );
                    Config::default()
                }
                Err(e) => {
                    return Err(e).context("failed to load default config");
                }
            }
        }
    };

    if !cli.set.is_empty() {
        let pairs: Vec<(String, String)> = cli
            .set
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| anyhow::anyhow!("override '{}' is not KEY=VALUE", entry))
            })
            .collect::<anyhow::Result<_>>()?;
        let overrides =
            Config::load_from_overrides(&pairs).context("failed to parse overrides")?;
        config = Config::merge(config, overrides);
    }

    Ok(config)
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level = match config.get_str("log.level").unwrap_or("info") {
        "error" => tracing::Level::ERROR,
        "warning" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "verbose" => tracing::Level::TRACE,
        other => anyhow::bail!(
            "invalid log level: {}. Should be error|warning|info|verbose",
            other
        ),
    };

    if config.get_bool("log.stdout").unwrap_or(true) {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stdout)
            .init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    println!("XynqDB v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config)?;

    config.enumerate(|key, value| {
        tracing::info!(target: "xynq::main", "loaded config: {} -> {}", key, value);
    });

    let (mut manager, state) = server::build(&config)?;
    signal::install(manager.stop_handle());

    tracing::info!(
        target: "xynq::main",
        "initialization complete, starting task manager ({} threads, {} listeners)",
        manager.num_threads(),
        state.listeners.len()
    );

    manager.run();
    tracing::info!(target: "xynq::main", "shut down");
    Ok(())
}
