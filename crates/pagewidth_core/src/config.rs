use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://www.notion.so/api/v3";
pub const DEFAULT_USER_AGENT: &str = "pagewidth/0.2";
pub const DEFAULT_CONFIG_FILENAME: &str = ".pagewidth.toml";
pub const CONFIG_PATH_ENV: &str = "PAGEWIDTH_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PagewidthConfig {
    #[serde(default)]
    pub notion: NotionSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct NotionSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub token_v2: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub max_write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub read_interval_ms: Option<u64>,
}

impl PagewidthConfig {
    /// Resolve the API base URL: env NOTION_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        resolve_value(
            env_override("NOTION_API_URL"),
            self.notion.api_url.as_deref(),
            DEFAULT_API_URL,
        )
        .trim_end_matches('/')
        .to_string()
    }

    /// Resolve user agent: env NOTION_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        resolve_value(
            env_override("NOTION_USER_AGENT"),
            self.notion.user_agent.as_deref(),
            DEFAULT_USER_AGENT,
        )
    }

    /// Resolve the session cookie: env NOTION_TOKEN_V2 > config > None.
    pub fn token_v2(&self) -> Option<String> {
        env_override("NOTION_TOKEN_V2").or_else(|| {
            self.notion
                .token_v2
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        })
    }
}

pub fn load_config(config_path: &Path) -> Result<PagewidthConfig> {
    if !config_path.exists() {
        return Ok(PagewidthConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PagewidthConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Config file location: flag > env PAGEWIDTH_CONFIG > `.pagewidth.toml` in `cwd`.
pub fn resolve_config_path(flag: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = env_override(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    cwd.join(DEFAULT_CONFIG_FILENAME)
}

pub(crate) fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_value(env_value: Option<String>, config_value: Option<&str>, default: &str) -> String {
    env_value
        .or_else(|| {
            config_value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| default.to_string())
}
