//! Configuration for the muxserve binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::server::{
    ServerOptions, DEFAULT_BUFFER_SIZE, DEFAULT_EVENTS_CAPACITY, DEFAULT_MAX_CONNECTIONS,
};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Handler served to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Return every chunk unchanged
    #[default]
    Echo,
    /// Echo trimmed lines
    Line,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "muxserve")]
#[command(version)]
#[command(about = "A single-threaded multiplexed TCP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (empty for all interfaces)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (0 picks an ephemeral port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind IPv4 only instead of dual-stack
    #[arg(long)]
    pub ipv4_only: bool,

    /// Protocol served to clients
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Bytes received per read
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default)]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefer a dual-stack IPv6 socket
    #[serde(default = "default_dual_stack")]
    pub dual_stack: bool,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Protocol served to clients
    #[serde(default)]
    pub protocol: ProtocolType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            dual_stack: default_dual_stack(),
            max_connections: default_max_connections(),
            protocol: ProtocolType::default(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Bytes received per read
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Readiness events fetched per wait
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// Wait timeout in milliseconds (unset blocks indefinitely)
    pub poll_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            events_capacity: default_events_capacity(),
            poll_timeout_ms: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_dual_stack() -> bool {
    true
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_events_capacity() -> usize {
    DEFAULT_EVENTS_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dual_stack: bool,
    pub protocol: ProtocolType,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub events_capacity: usize,
    pub poll_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point to, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            dual_stack: !cli.ipv4_only && toml_config.server.dual_stack,
            protocol: cli.protocol.unwrap_or(toml_config.server.protocol),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.runtime.buffer_size),
            events_capacity: toml_config.runtime.events_capacity,
            poll_timeout: toml_config.runtime.poll_timeout_ms.map(Duration::from_millis),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Server options for this configuration (logger left to the caller).
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            dual_stack: self.dual_stack,
            buffer_size: self.buffer_size,
            max_connections: self.max_connections,
            events_capacity: self.events_capacity,
            poll_timeout: self.poll_timeout,
            logger: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
