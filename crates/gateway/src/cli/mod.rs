pub mod config;

use clap::{Parser, Subcommand};

use portico_domain::config::Config;

/// Portico — a session-lifecycle gateway for JSON-RPC clients.
#[derive(Debug, Parser)]
#[command(name = "portico", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `PORTICO_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the path
/// that was used.
///
/// This is shared by `serve` and the `config` subcommands so the logic
/// lives in one place.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path =
        std::env::var("PORTICO_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

/// Parse a config file, falling back to defaults when it does not exist.
pub fn load_config_from(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
    } else {
        Ok(Config::default())
    }
}
