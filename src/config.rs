//! Configuration for the console and the site preview.
//!
//! Loaded from `~/.compliancehub/config.toml` (or `$HUB_CONFIG`), then
//! overridden by `HUB_BACKEND_URL`, `HUB_ANON_KEY` and `HUB_SITE_PORT`.

use crate::session::AdminPolicy;
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Hosted backend endpoint
    #[serde(default)]
    pub backend: BackendConfig,

    /// Who counts as the site admin
    #[serde(default)]
    pub admin: AdminPolicy,

    /// Local session persistence
    #[serde(default)]
    pub session: SessionConfig,

    /// Site preview server
    #[serde(default)]
    pub site: SiteConfig,
}

/// Hosted backend settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Project URL, e.g. https://xyz.example.co
    #[serde(default)]
    pub url: Option<String>,

    /// Public anon key (or env var reference like ${HUB_ANON_KEY})
    #[serde(default)]
    pub anon_key: Option<String>,
}

impl BackendConfig {
    pub fn require_url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("backend.url is not configured (set it in config.toml or HUB_BACKEND_URL)"))
    }

    /// Resolve the anon key from environment if needed
    pub fn resolve_anon_key(&self) -> Option<SecretString> {
        self.anon_key
            .as_deref()
            .and_then(resolve_env_ref)
            .map(SecretString::from)
    }
}

/// Session persistence settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Path to the session file (supports ~ expansion)
    #[serde(default = "default_session_file")]
    pub file: String,

    /// Keep the session across runs
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_session_file() -> String {
    "~/.compliancehub/session.json".to_string()
}

fn default_persist() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: default_session_file(),
            persist: default_persist(),
        }
    }
}

impl SessionConfig {
    pub fn resolve_file(&self) -> PathBuf {
        expand_home(&self.file)
    }
}

/// Site preview server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl SiteConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// `${NAME}` resolves from the environment; anything else is taken literally.
fn resolve_env_ref(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let env_var = &value[2..value.len() - 1];
        std::env::var(env_var).ok()
    } else {
        Some(value.to_string())
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Directory holding config, session and history files.
pub fn hub_dir() -> PathBuf {
    expand_home("~/.compliancehub")
}

pub fn default_config_path() -> PathBuf {
    match std::env::var("HUB_CONFIG") {
        Ok(path) if !path.is_empty() => expand_home(&path),
        _ => hub_dir().join("config.toml"),
    }
}

impl Config {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("HUB_BACKEND_URL") {
            self.backend.url = Some(url);
        }
        if let Ok(key) = std::env::var("HUB_ANON_KEY") {
            self.backend.anon_key = Some(key);
        }
        if let Ok(port) = std::env::var("HUB_SITE_PORT") {
            self.site.port = port
                .parse()
                .with_context(|| format!("HUB_SITE_PORT is not a port number: {}", port))?;
        }
        Ok(())
    }
}
