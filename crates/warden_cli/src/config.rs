//! Configuration file support for warden.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `WARDEN_`, e.g., `WARDEN_GITHUB_TOKEN`)
//! 3. Config file (~/.config/warden/config.toml or ./warden.toml)
//! 4. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [github]
//! token = "ghp_..."  # or use WARDEN_GITHUB_TOKEN / GITHUB_TOKEN
//! endpoint = "https://github.example.com"  # GitHub Enterprise Server only
//!
//! [collect]
//! namespaces = ["organization", "repository"]
//! orgs = ["acme"]
//! ignored_policies = ["repository_not_maintained"]
//! scorecard = false
//! requests_per_second = 10
//! progress_timeout_secs = 60
//!
//! [output]
//! format = "table"
//! permissions_file = "warden-issues.json"
//!
//! [engine]
//! command = "opa-eval-warden"
//! args = ["--policies", "./policies"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use warden::platform::GITHUB_DEFAULT_RPS;

use crate::output::OutputFormat;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    /// What to collect and how fast.
    pub collect: CollectConfig,
    pub output: OutputConfig,
    /// External policy engine.
    pub engine: EngineConfig,
}

/// GitHub configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Classic personal access token.
    /// Can also be set via WARDEN_GITHUB_TOKEN or GITHUB_TOKEN.
    pub token: Option<String>,
    /// GitHub Enterprise Server root URL.
    pub endpoint: Option<String>,
}

/// Collection defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Namespaces to collect; empty means all of them.
    pub namespaces: Vec<String>,
    pub orgs: Vec<String>,
    /// `owner/name` repositories; restricts the run to the repository namespace.
    pub repositories: Vec<String>,
    /// Enterprise slugs for the enterprise namespace.
    pub enterprises: Vec<String>,
    pub ignored_policies: Vec<String>,
    /// Run OpenSSF Scorecard on every repository.
    pub scorecard: bool,
    pub requests_per_second: u32,
    /// Disable proactive pacing (secondary limits are still honored).
    pub no_rate_limit: bool,
    /// How long to wait for every namespace's progress renderer to appear.
    pub progress_timeout_secs: u64,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            orgs: Vec::new(),
            repositories: Vec::new(),
            enterprises: Vec::new(),
            ignored_policies: Vec::new(),
            scorecard: false,
            requests_per_second: GITHUB_DEFAULT_RPS,
            no_rate_limit: false,
            progress_timeout_secs: warden::DEFAULT_GATE_TIMEOUT.as_secs(),
        }
    }
}

impl CollectConfig {
    /// `None` when pacing is disabled.
    pub fn requests_per_second(&self) -> Option<u32> {
        (!self.no_rate_limit).then_some(self.requests_per_second)
    }

    pub fn progress_timeout(&self) -> Duration {
        Duration::from_secs(self.progress_timeout_secs)
    }
}

/// Output defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Where to write the missing-permission and skipped-policy report.
    pub permissions_file: Option<PathBuf>,
    /// Only print failed policies.
    pub failed_only: bool,
}

/// External policy engine command.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Engine processes allowed to run at once.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            max_concurrency: 8,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/warden/config.toml)
    /// 3. Local config file (./warden.toml)
    /// 4. Environment variables with WARDEN_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!(path = %path.display(), "Loading config");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from("warden.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./warden.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., WARDEN_GITHUB_TOKEN -> github.token, WARDEN_COLLECT_ORGS=a,b -> collect.orgs
        builder = builder.add_source(
            Environment::with_prefix("WARDEN")
                .separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("collect.orgs")
                .with_list_parse_key("collect.namespaces")
                .with_list_parse_key("collect.repositories")
                .with_list_parse_key("collect.enterprises"),
        );

        let mut config = match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to deserialize config");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build config");
                Config::default()
            }
        };

        if config.github.token.is_none() {
            config.github.token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        }
        if config.github.endpoint.is_none() {
            config.github.endpoint = std::env::var("GITHUB_ENDPOINT").ok().filter(|e| !e.is_empty());
        }
        config
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "warden").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
