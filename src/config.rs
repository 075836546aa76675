use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_PATH_ENV: &str = "CLAWGATE_CONFIG";
/// Environment variable overriding the upstream command line
pub const UPSTREAM_COMMAND_ENV: &str = "CLAWGATE_UPSTREAM_COMMAND";
/// Environment variable overriding the API wrapper's CLI command line
pub const CLI_COMMAND_ENV: &str = "CLAWGATE_CLI_COMMAND";

/// Port handed to the supervised gateway through the environment
pub const GATEWAY_PORT_ENV: &str = "OPENCLAW_GATEWAY_PORT";
/// Bind mode handed to the supervised gateway through the environment
pub const GATEWAY_BIND_ENV: &str = "OPENCLAW_GATEWAY_BIND";
/// The only bind mode the front door ever hands to its gateway
pub const GATEWAY_BIND_LOOPBACK: &str = "loopback";

/// Front door configuration, built once at startup and never mutated
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Public listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Supervised gateway settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 8080, a valid non-zero `PORT` overrides)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0); only the config file sets it
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Plain-text body served on `/`
    #[serde(default = "default_root_banner")]
    pub root_banner: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            root_banner: default_root_banner(),
        }
    }
}

/// Configuration for the gateway process living behind the front door
///
/// # Security Warning
///
/// `command` and `args` are executed directly with the permissions of the
/// front door. Configuration files must only come from trusted sources.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Loopback port the gateway listens on (default: 18789)
    #[serde(default = "default_upstream_port")]
    pub port: u16,

    /// Program to execute (default: node)
    #[serde(default = "default_upstream_command")]
    pub command: String,

    /// Arguments; when unset the gateway's own `run` arguments are derived from `port`
    pub args: Option<Vec<String>>,

    /// Working directory for the gateway (default: inherited)
    pub working_dir: Option<String>,

    /// Extra environment variables on top of the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Grace period in seconds between SIGTERM and SIGKILL on shutdown
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            port: default_upstream_port(),
            command: default_upstream_command(),
            args: None,
            working_dir: None,
            env: HashMap::new(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }
}

impl UpstreamConfig {
    /// Arguments passed to `command`
    pub fn resolved_args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => vec![
                "dist/index.js".to_string(),
                "gateway".to_string(),
                "run".to_string(),
                "--allow-unconfigured".to_string(),
                "--port".to_string(),
                self.port.to_string(),
                "--bind".to_string(),
                GATEWAY_BIND_LOOPBACK.to_string(),
            ],
        }
    }

    /// Address the proxy dials; always loopback
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Replace command and args with a shell-words command line
    pub fn set_command_line(&mut self, line: &str) -> anyhow::Result<()> {
        let (command, args) = split_command_line(line)?;
        self.command = command;
        self.args = Some(args);
        Ok(())
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_root_banner() -> String {
    "EDON Claw Gateway running".to_string()
}

fn default_upstream_port() -> u16 {
    18789
}

fn default_upstream_command() -> String {
    "node".to_string()
}

fn default_shutdown_grace_period() -> u64 {
    10
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// The file named by `CLAWGATE_CONFIG` is read first; `PORT` and
    /// `CLAWGATE_UPSTREAM_COMMAND` are then applied on top of it. `BIND` and
    /// `HOST` are not consulted: the public listener stays on the
    /// configured address (0.0.0.0 unless the file says otherwise).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            Some(path) => Config::load(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config file '{}': {}", path, e))?,
            None => Config::default(),
        };

        if let Some(port) = lookup_port(&lookup) {
            config.server.port = port;
        }

        if let Some(line) = lookup(UPSTREAM_COMMAND_ENV).filter(|c| !c.trim().is_empty()) {
            config.upstream.set_command_line(&line)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_listen_addr(&self.server.bind, self.server.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.upstream.port == 0 {
            errors.push("upstream 'port' must be greater than 0".to_string());
        }
        if self.upstream.command.trim().is_empty() {
            errors.push("upstream 'command' must not be empty".to_string());
        }
        if self.server.root_banner.is_empty() {
            errors.push("server 'root_banner' must not be empty".to_string());
        }
        if let Err(e) = self.listen_addr() {
            errors.push(e.to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

/// Configuration for the API wrapper binary
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub bind: String,
    /// CLI program run by `/api/run-cli`
    pub cli_command: String,
    pub cli_args: Vec<String>,
    /// Working directory the CLI runs in
    pub working_dir: PathBuf,
    /// Whether `OPENCLAW_GATEWAY_TOKEN` is present
    pub token_set: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            cli_command: default_upstream_command(),
            cli_args: vec![
                "dist/index.js".to_string(),
                "gateway".to_string(),
                "--allow-unconfigured".to_string(),
            ],
            working_dir: PathBuf::from("."),
            token_set: false,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ApiConfig::default();

        if let Some(port) = lookup_port(&lookup) {
            config.port = port;
        }

        if let Some(bind) = lookup_bind(&lookup) {
            config.bind = bind;
        }

        if let Some(line) = lookup(CLI_COMMAND_ENV).filter(|c| !c.trim().is_empty()) {
            let (command, args) = split_command_line(&line)?;
            config.cli_command = command;
            config.cli_args = args;
        }

        config.token_set = lookup("OPENCLAW_GATEWAY_TOKEN").is_some_and(|t| !t.is_empty());

        config.listen_addr()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_listen_addr(&self.bind, self.port)
    }
}

fn lookup_bind<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup("BIND")
        .filter(|b| !b.is_empty())
        .or_else(|| lookup("HOST").filter(|h| !h.is_empty()))
}

/// A usable `PORT`, if one is set. Zero and unparsable values are ignored so
/// the listener keeps its configured port, 8080 by default.
fn lookup_port<F>(lookup: &F) -> Option<u16>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup("PORT").filter(|p| !p.trim().is_empty())?;
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            warn!(value = %raw, "Ignoring invalid PORT");
            None
        }
    }
}

fn parse_listen_addr(bind: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = match bind {
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        other => other
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", other, e))?,
    };
    Ok(SocketAddr::new(ip, port))
}

fn split_command_line(line: &str) -> anyhow::Result<(String, Vec<String>)> {
    let mut words = shell_words::split(line)
        .map_err(|e| anyhow::anyhow!("Invalid command line '{}': {}", line, e))?
        .into_iter();
    let command = words
        .next()
        .ok_or_else(|| anyhow::anyhow!("Command line is empty"))?;
    Ok((command, words.collect()))
}
