use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{SyncError, SyncResult};
use crate::providers::KindNames;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_ADO_URL: &str = "https://dev.azure.com";

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub jira: Option<JiraConfig>,
    pub ado: Option<AdoConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Jira,
    Ado,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
    pub kinds: Option<KindNames>,
}

#[derive(Debug, Deserialize)]
pub struct AdoConfig {
    pub organization: String,
    pub project: String,
    pub personal_access_token: String,
    pub base_url: Option<String>,
    pub kinds: Option<KindNames>,
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    pub provider: Option<ProviderKind>,
    pub project_root: Option<PathBuf>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider: None,
            project_root: None,
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn require(section: &str, field: &str, value: &str) -> SyncResult<()> {
    if value.trim().is_empty() {
        return Err(SyncError::Config(format!("{section}.{field} is empty")));
    }
    Ok(())
}

impl JiraConfig {
    pub fn validate(&self) -> SyncResult<()> {
        require("jira", "domain", &self.domain)?;
        require("jira", "email", &self.email)?;
        require("jira", "api_token", &self.api_token)?;
        require("jira", "project_key", &self.project_key)
    }
}

impl AdoConfig {
    pub fn validate(&self) -> SyncResult<()> {
        require("ado", "organization", &self.organization)?;
        require("ado", "project", &self.project)?;
        require("ado", "personal_access_token", &self.personal_access_token)
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_ADO_URL)
            .trim_end_matches('/')
    }
}

impl AppConfig {
    /// The provider to use: the explicit `sync.provider`, or the only
    /// configured one.
    pub fn provider_kind(&self) -> SyncResult<ProviderKind> {
        if let Some(kind) = self.sync.provider {
            return Ok(kind);
        }
        match (&self.jira, &self.ado) {
            (Some(_), None) => Ok(ProviderKind::Jira),
            (None, Some(_)) => Ok(ProviderKind::Ado),
            (Some(_), Some(_)) => Err(SyncError::Config(
                "both [jira] and [ado] are configured; set sync.provider".into(),
            )),
            (None, None) => Err(SyncError::Config(format!(
                "no provider configured. Add a [jira] or [ado] section to {}",
                config_path().display()
            ))),
        }
    }

    pub fn project_root(&self) -> PathBuf {
        self.sync
            .project_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reqsync")
}

pub fn load_config() -> Result<AppConfig> {
    let path = config_path();
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).with_context(|| "Failed to parse config.toml")
}
