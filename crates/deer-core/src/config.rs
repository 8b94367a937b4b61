//! Configuration system for Deer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration struct for Deer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// MCP client settings and server recipes
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Client name announced to MCP servers during the handshake
    pub client_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            client_name: "deer".to_string(),
        }
    }
}

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Servers keyed by name
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            servers: BTreeMap::new(),
        }
    }
}

impl McpConfig {
    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Servers that are not disabled, in name order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.servers.iter().filter(|(_, server)| server.enabled)
    }
}

/// How to reach one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerTransport {
    /// Spawn a child process and speak newline-delimited JSON over its stdio.
    Stdio {
        /// Executable to run
        command: String,
        /// Command arguments
        #[serde(default)]
        args: Vec<String>,
        /// Environment overrides on top of the inherited environment
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Working directory for the child
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    /// POST one JSON-RPC message per HTTP request.
    #[serde(alias = "http-stream", alias = "http_stream")]
    StreamableHttp {
        /// Endpoint URL
        url: String,
    },
}

/// Configuration for one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Transport recipe
    #[serde(flatten)]
    pub transport: ServerTransport,
    /// Whether this server is started with the others
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    /// A stdio server running `command`.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self {
            transport: ServerTransport::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: BTreeMap::new(),
                working_dir: None,
            },
            enabled: true,
        }
    }

    /// A streamable HTTP server at `url`.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: ServerTransport::StreamableHttp { url: url.into() },
            enabled: true,
        }
    }

    /// Set the arguments. No-op for HTTP servers.
    pub fn with_args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let ServerTransport::Stdio { args, .. } = &mut self.transport {
            *args = new_args.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Add an environment variable. No-op for HTTP servers.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let ServerTransport::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Set the working directory. No-op for HTTP servers.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let ServerTransport::Stdio { working_dir, .. } = &mut self.transport {
            *working_dir = Some(dir.into());
        }
        self
    }

    /// Set whether the server is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Short transport name, as written in the config file.
    pub fn transport_kind(&self) -> &'static str {
        match self.transport {
            ServerTransport::Stdio { .. } => "stdio",
            ServerTransport::StreamableHttp { .. } => "streamable_http",
        }
    }

    /// Command line or URL, for display.
    pub fn target(&self) -> String {
        match &self.transport {
            ServerTransport::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            ServerTransport::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
            ServerTransport::StreamableHttp { url } => url.clone(),
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "mcp.servers.github.command")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

/// Separator between server and tool names in namespaced tool names.
const NAMESPACE_SEPARATOR: &str = "__";

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Self::base()
            // User config
            .merge(Toml::file(config_dir.join("config.toml")))
            // Project config
            .merge(Toml::file(".deer/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".deer/config.local.toml"))
            // Environment variables, e.g. DEER_MCP__REQUEST_TIMEOUT_SECS
            .merge(Env::prefixed("DEER_").split("__"))
            .extract()
    }

    /// Load configuration from one explicit file, plus environment overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(figment::Error::from(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        Self::base()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DEER_").split("__"))
            .extract()
    }

    /// Parse configuration from a TOML string on top of the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Self::base().merge(Toml::string(toml)).extract()
    }

    fn base() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    /// Validate an already loaded configuration, logging warnings.
    pub fn into_validated(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.client_name.trim().is_empty() {
            result.add_error("general.client_name", "client_name cannot be empty");
        }

        if self.mcp.request_timeout_secs == 0 {
            result.add_error("mcp.request_timeout_secs", "request_timeout_secs must be greater than 0");
        } else if self.mcp.request_timeout_secs > 600 {
            result.add_warning(
                "mcp.request_timeout_secs",
                "request_timeout_secs is very high (> 10 minutes), stuck servers will hold requests that long",
            );
        }

        for (name, server) in &self.mcp.servers {
            let field = format!("mcp.servers.{}", name);

            if name.trim().is_empty() {
                result.add_error(&field, "server name cannot be empty");
            }
            if name.contains(NAMESPACE_SEPARATOR) {
                result.add_error(
                    &field,
                    format!("server name cannot contain '{}' (used to namespace tool names)", NAMESPACE_SEPARATOR),
                );
            }

            match &server.transport {
                ServerTransport::Stdio { command, args, .. } => {
                    if command.trim().is_empty() {
                        result.add_error(format!("{}.command", field), "command cannot be empty");
                    } else if args.is_empty() && command.trim().contains(' ') {
                        result.add_warning(
                            format!("{}.command", field),
                            "command contains spaces; pass arguments through 'args'",
                        );
                    }
                }
                ServerTransport::StreamableHttp { url } => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        result.add_error(format!("{}.url", field), "url must start with http:// or https://");
                    }
                }
            }
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("deer"))
            .unwrap_or_else(|| PathBuf::from("~/.config/deer"))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
