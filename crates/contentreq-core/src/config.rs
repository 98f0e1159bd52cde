//! Settings for the bridge, read from `contentreq/config.toml` under the
//! platform config directory (`~/.config` on Linux, `%APPDATA%` on Windows).
//!
//! Environment variables override the file (see [`Config::apply_env`]).
//! The access token only ever comes from `ADO_PERSONAL_ACCESS_TOKEN`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FILE_NAME: &str = "config.toml";
const APP_DIR: &str = "contentreq";

/// Environment variable holding the Azure DevOps personal access token.
pub const TOKEN_ENV: &str = "ADO_PERSONAL_ACCESS_TOKEN";
/// Environment variable overriding the organization URL.
pub const ORGANIZATION_ENV: &str = "ADO_ORGANIZATION_URL";
/// Environment variable overriding the default project.
pub const PROJECT_ENV: &str = "ADO_DEFAULT_PROJECT";
pub const HOST_ENV: &str = "API_HOST";
pub const PORT_ENV: &str = "API_PORT";

/// Everything the CLI, the facade and the worker read at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Azure DevOps connection settings
    #[serde(default)]
    pub azure_devops: AzureDevOpsConfig,

    /// HTTP facade settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Worker supervision settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Azure DevOps configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureDevOpsConfig {
    /// Organization URL, e.g. `https://dev.azure.com/my-org`
    pub organization_url: String,
    /// Project new requests are filed in
    pub project: String,
    /// Work item type used for new requests
    pub work_item_type: String,
    /// Team whose iterations are listed when no team is named
    pub default_team: String,
    pub request_timeout_secs: u64,
}

impl Default for AzureDevOpsConfig {
    fn default() -> Self {
        Self {
            organization_url: "https://dev.azure.com/msft-skilling".to_string(),
            project: "Content".to_string(),
            work_item_type: "User Story".to_string(),
            default_team: "Content Team".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// HTTP facade configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3003,
        }
    }
}

/// Worker supervision configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay before the first reconnect; doubles with every failed attempt
    pub retry_base_delay_ms: u64,
    /// Failed attempts after which automatic reconnects stop
    pub max_retries: u32,
    pub health_check_interval_secs: u64,
    /// Deadline for a single tool call
    pub call_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    /// Tool called after the handshake and on every health check
    pub smoke_test_tool: String,
    /// Worker executable; defaults to this binary's `worker` subcommand
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub worker_args: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 5000,
            max_retries: 5,
            health_check_interval_secs: 30,
            call_timeout_secs: 30,
            handshake_timeout_secs: 15,
            smoke_test_tool: "get_team_dashboard".to_string(),
            worker_command: None,
            worker_args: Vec::new(),
        }
    }
}

fn config_err(action: &'static str) -> impl Fn(String) -> Error {
    move |detail| Error::Config(format!("Could not {action} config: {detail}"))
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::Config("No platform config directory".to_string()))?;
        Ok(base.join(APP_DIR))
    }

    pub fn config_path() -> Result<PathBuf> {
        Self::config_dir().map(|dir| dir.join(FILE_NAME))
    }

    /// Read the default config file. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::read(&Self::config_path()?)
    }

    /// Read `path`, falling back to defaults when it does not exist.
    pub fn read(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(config_err("read")(e.to_string())),
        };
        let config = toml::from_str(&text).map_err(|e| config_err("parse")(e.to_string()))?;
        debug!(path = %path.display(), "Config read");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.write(&Self::config_path()?)
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| config_err("encode")(e.to_string()))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| config_err("create directory for")(e.to_string()))?;
        }
        std::fs::write(path, text).map_err(|e| config_err("write")(e.to_string()))?;
        info!(path = %path.display(), "Config written");
        Ok(())
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = present(ORGANIZATION_ENV) {
            self.azure_devops.organization_url = url;
        }
        if let Some(project) = present(PROJECT_ENV) {
            self.azure_devops.project = project;
        }
        if let Some(host) = present(HOST_ENV) {
            self.server.host = host;
        }
        if let Some(port) = present(PORT_ENV) {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid {}: {}", PORT_ENV, port)))?;
        }
        Ok(())
    }

    /// Read the access token from the process environment.
    pub fn access_token() -> Result<String> {
        Self::access_token_with(|key| std::env::var(key).ok())
    }

    /// Read the access token using `lookup`. A missing or blank token is an error.
    pub fn access_token_with<F>(lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(TOKEN_ENV)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("{} is not set", TOKEN_ENV)))
    }

    /// Set a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `azure_devops.project`, `server.port`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, field) = split_key(key)?;

        match (section, field) {
            ("azure_devops", "organization_url" | "url") => {
                self.azure_devops.organization_url = value.to_string()
            }
            ("azure_devops", "project") => self.azure_devops.project = value.to_string(),
            ("azure_devops", "work_item_type") => {
                self.azure_devops.work_item_type = value.to_string()
            }
            ("azure_devops", "default_team" | "team") => {
                self.azure_devops.default_team = value.to_string()
            }
            ("azure_devops", "request_timeout_secs") => {
                self.azure_devops.request_timeout_secs = parse_number(key, value)?
            }
            ("server", "host") => self.server.host = value.to_string(),
            ("server", "port") => self.server.port = parse_number(key, value)?,
            ("supervisor", "retry_base_delay_ms") => {
                self.supervisor.retry_base_delay_ms = parse_number(key, value)?
            }
            ("supervisor", "max_retries") => {
                self.supervisor.max_retries = parse_number(key, value)?
            }
            ("supervisor", "health_check_interval_secs") => {
                self.supervisor.health_check_interval_secs = parse_number(key, value)?
            }
            ("supervisor", "call_timeout_secs") => {
                self.supervisor.call_timeout_secs = parse_number(key, value)?
            }
            ("supervisor", "handshake_timeout_secs") => {
                self.supervisor.handshake_timeout_secs = parse_number(key, value)?
            }
            ("supervisor", "smoke_test_tool") => {
                self.supervisor.smoke_test_tool = value.to_string()
            }
            ("supervisor", "worker_command") => {
                self.supervisor.worker_command = Some(value.to_string())
            }
            ("supervisor", "worker_args") => {
                self.supervisor.worker_args =
                    value.split_whitespace().map(str::to_string).collect()
            }
            ("azure_devops" | "server" | "supervisor", _) => {
                return Err(Error::Config(format!(
                    "Unknown {} config field: {}",
                    section, field
                )))
            }
            _ => return Err(Error::Config(format!("Unknown section: {}", section))),
        }

        Ok(())
    }

    /// Get a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `azure_devops.project`, `server.port`)
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let (section, field) = split_key(key)?;

        let value = match (section, field) {
            ("azure_devops", "organization_url" | "url") => {
                Some(self.azure_devops.organization_url.clone())
            }
            ("azure_devops", "project") => Some(self.azure_devops.project.clone()),
            ("azure_devops", "work_item_type") => Some(self.azure_devops.work_item_type.clone()),
            ("azure_devops", "default_team" | "team") => {
                Some(self.azure_devops.default_team.clone())
            }
            ("azure_devops", "request_timeout_secs") => {
                Some(self.azure_devops.request_timeout_secs.to_string())
            }
            ("server", "host") => Some(self.server.host.clone()),
            ("server", "port") => Some(self.server.port.to_string()),
            ("supervisor", "retry_base_delay_ms") => {
                Some(self.supervisor.retry_base_delay_ms.to_string())
            }
            ("supervisor", "max_retries") => Some(self.supervisor.max_retries.to_string()),
            ("supervisor", "health_check_interval_secs") => {
                Some(self.supervisor.health_check_interval_secs.to_string())
            }
            ("supervisor", "call_timeout_secs") => {
                Some(self.supervisor.call_timeout_secs.to_string())
            }
            ("supervisor", "handshake_timeout_secs") => {
                Some(self.supervisor.handshake_timeout_secs.to_string())
            }
            ("supervisor", "smoke_test_tool") => Some(self.supervisor.smoke_test_tool.clone()),
            ("supervisor", "worker_command") => self.supervisor.worker_command.clone(),
            ("supervisor", "worker_args") => {
                if self.supervisor.worker_args.is_empty() {
                    None
                } else {
                    Some(self.supervisor.worker_args.join(" "))
                }
            }
            ("azure_devops" | "server" | "supervisor", _) => {
                return Err(Error::Config(format!(
                    "Unknown {} config field: {}",
                    section, field
                )))
            }
            _ => return Err(Error::Config(format!("Unknown section: {}", section))),
        };

        Ok(value)
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, field)) if !field.contains('.') => Ok((section, field)),
        _ => Err(Error::Config(format!(
            "Config keys look like section.field, got '{key}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid number for {}: {}", key, value)))
}
