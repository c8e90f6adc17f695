use clap::Parser;
use std::path::PathBuf;

use crate::config::GatewayConfig;

#[derive(Parser)]
#[command(
    name = "mcp-gateway",
    version,
    about = "Multiplexes MCP backend servers behind a single HTTP endpoint"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the host to bind to.
    #[arg(long)]
    pub host: Option<String>,

    /// Override the port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override the logging level.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Disable the meta facade at /mcp (direct backend access only).
    #[arg(long)]
    pub no_meta_mcp: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.no_meta_mcp {
            config.enable_meta_mcp = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "mcp-gateway",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--log-level",
            "debug",
            "--no-meta-mcp",
        ]);
        let mut config = GatewayConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, "debug");
        assert!(!config.enable_meta_mcp);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let cli = Cli::parse_from(["mcp-gateway"]);
        let mut config = GatewayConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, GatewayConfig::default());
    }
}
