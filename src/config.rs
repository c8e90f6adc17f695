use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Transport type for a backend, derived from its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Http => f.write_str("http"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

/// Per-backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name. Filled from the map key during load.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Shell-quoted command line for stdio backends.
    pub command: Option<String>,

    /// URL for streamable-http backends; a `/sse` suffix selects the
    /// endpoint-negotiated SSE transport.
    pub http_url: Option<String>,

    /// Environment variables merged over the ambient environment of the
    /// child process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// HTTP headers sent with every request to an http/sse backend.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Working directory for the child process.
    pub cwd: Option<String>,

    /// Seconds of inactivity before the idle checker hibernates the backend.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl BackendConfig {
    /// Transport selection is a pure function of the config: `command` means
    /// stdio, a `/sse` URL means SSE, any other URL means streamable-http.
    pub fn transport_type(&self) -> TransportKind {
        if self.command.is_some() {
            TransportKind::Stdio
        } else if self.http_url.as_deref().is_some_and(|u| u.ends_with("/sse")) {
            TransportKind::Sse
        } else {
            TransportKind::Http
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout.max(0.0))
    }

    /// The command string tokenized POSIX-shell-style.
    pub fn command_argv(&self) -> Option<Vec<String>> {
        self.command.as_deref().and_then(shlex::split)
    }

    fn expand_env(&mut self) {
        if let Some(command) = &self.command {
            self.command = Some(expand_env_vars(command));
        }
        if let Some(url) = &self.http_url {
            self.http_url = Some(expand_env_vars(url));
        }
        if let Some(cwd) = &self.cwd {
            self.cwd = Some(expand_env_vars(cwd));
        }
        for value in self.env.values_mut() {
            *value = expand_env_vars(value);
        }
        for value in self.headers.values_mut() {
            *value = expand_env_vars(value);
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_meta_mcp: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between health checks of the HTTP runtime.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: f64,

    /// Default request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,

    /// Backend map, insertion-ordered. `servers:` is accepted as an alias.
    #[serde(default, alias = "servers")]
    pub backends: IndexMap<String, BackendConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_meta_mcp: true,
            log_level: default_log_level(),
            health_check_interval: default_health_check_interval(),
            request_timeout: default_request_timeout(),
            backends: IndexMap::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    39400
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_health_check_interval() -> f64 {
    30.0
}
fn default_request_timeout() -> f64 {
    30.0
}
fn default_idle_timeout() -> f64 {
    300.0
}

/// Expand `${VAR}` and `$VAR` references from the process environment.
/// Unknown variables are passed through verbatim.
pub fn expand_env_vars(value: &str) -> String {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

    re.replace_all(value, |caps: &regex::Captures<'_>| {
        let var = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

impl GatewayConfig {
    /// Load config from a YAML file.
    ///
    /// Pipeline: read file → deserialize YAML → fill backend names →
    /// expand env references → validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("config file not found: {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse a YAML document into a validated config.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: GatewayConfig =
            serde_yaml_ng::from_str(raw).context("invalid YAML configuration")?;

        for (name, backend) in config.backends.iter_mut() {
            backend.name = name.clone();
            backend.expand_env();
        }

        config.validate()?;
        Ok(config)
    }

    /// Only the backends that are enabled.
    pub fn enabled_backends(&self) -> impl Iterator<Item = (&String, &BackendConfig)> {
        self.backends.iter().filter(|(_, b)| b.enabled)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be in 1..=65535");
        }

        for (name, backend) in &self.backends {
            match (&backend.command, &backend.http_url) {
                (None, None) => {
                    anyhow::bail!("backend '{name}' must have either 'command' or 'http_url'")
                }
                (Some(_), Some(_)) => {
                    anyhow::bail!(
                        "backend '{name}' must have exactly one of 'command' or 'http_url'"
                    )
                }
                _ => {}
            }

            if backend.idle_timeout < 0.0 {
                anyhow::bail!("backend '{name}': idle_timeout must be >= 0");
            }
        }
        Ok(())
    }
}
