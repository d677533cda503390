use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Service configuration, loaded once at start-up and shared by reference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    pub runner: Option<RunnerConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    pub app: GitHubAppConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    pub id: u64,
    pub webhook_secret: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdminConfig {
    pub token: Option<String>,
}

/// Target of the "delegate to an external runner" execution mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    #[serde(default = "default_runner_ref", rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub callback_token: String,
    pub public_url: Option<Url>,
}

fn default_runner_ref() -> String { "main".to_string() }

impl RunnerConfig {
    /// The URL the runner reports completion to, if the public URL is known.
    pub fn callback_url(&self) -> Option<Url> {
        self.public_url.as_ref().and_then(|base| base.join("/callbacks/runner").ok())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Clone and run the fixers inside this process.
    #[default]
    Local,
    /// Trigger a workflow run in the runner repository and wait for its callback.
    Dispatch,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: ExecutionMode,
    pub command_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub npm_cache_dir: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Local,
            command_timeout_secs: 10 * 60,
            max_output_bytes: 10 * 1024 * 1024,
            npm_cache_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn command_timeout(&self) -> Duration { Duration::from_secs(self.command_timeout_secs) }
}
