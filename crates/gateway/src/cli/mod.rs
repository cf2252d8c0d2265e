pub mod config;
pub mod discover;

use clap::{Parser, Subcommand};

use pr_domain::config::Config;

/// PrintRelay — LAN status and camera relay for resin printers.
#[derive(Debug, Parser)]
#[command(name = "printrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the relay server (default when no subcommand is given).
    Serve,
    /// Broadcast a discovery probe and list the printers that answer.
    Discover {
        /// How long to collect replies, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
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

/// Load the configuration from the path specified by `PR_CONFIG` (or
/// `config.toml` by default), then apply `PR_*` overrides.  Returns the
/// parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("PR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let mut config = load_config_file(&config_path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok((config, config_path))
}

/// Parse `path`, falling back to defaults when it does not exist.
pub fn load_config_file(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(config.printer.address.is_none());
    }

    #[test]
    fn file_values_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[printer]\naddress = \"192.168.1.50\"\n\n[camera]\nmax_fps = 5\n",
        )
        .unwrap();
        let config = load_config_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.printer.address.as_deref(), Some("192.168.1.50"));
        assert_eq!(config.camera.max_fps, 5);
        assert_eq!(config.broadcast.interval_ms, 1000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[camera\nmax_fps = ").unwrap();
        let err = load_config_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn cli_parses_discover_flags() {
        let cli = Cli::parse_from(["printrelay", "discover", "--timeout-ms", "500", "--json"]);
        match cli.command {
            Some(Command::Discover { timeout_ms, json }) => {
                assert_eq!(timeout_ms, Some(500));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
