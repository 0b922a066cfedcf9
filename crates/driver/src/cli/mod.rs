pub mod config;
pub mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use zw_domain::config::Config;

/// zwave-host: Z-Wave node interview driver.
#[derive(Debug, Parser)]
#[command(name = "zwave-host", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interview a simulated network and print the resulting node table.
    Simulate {
        /// Path to the scenario file.
        scenario: PathBuf,
        /// Keep interview results in `storage.cache_dir` instead of memory,
        /// so a second run resumes from the cache.
        #[arg(long)]
        persist: bool,
    },
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

/// Load the configuration from the path in `ZWAVE_CONFIG` (or
/// `config.toml` by default). A missing file yields the defaults.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("ZWAVE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}
