//! Engine settings (process level).
//!
//! Loaded from an explicit path, ~/.config/marble/marble.yml, ./marble.yml,
//! or compiled-in defaults. Settings name provider endpoints and the
//! environment variables holding their credentials; the credentials
//! themselves never live in a file.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Process-level settings for Marble.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Log level used when RUST_LOG is not set.
    #[serde(rename = "log-level")]
    pub log_level: String,

    /// LLM call defaults.
    pub llm: LlmSettings,

    /// Provider endpoints keyed by provider name.
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            llm: LlmSettings::default(),
            providers: default_providers(),
        }
    }
}

/// LLM call defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Model used when neither the agent nor the task names one.
    #[serde(rename = "default-model")]
    pub default_model: String,

    /// Timeout per HTTP call in milliseconds.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_model: "openai/gpt-4o-mini".to_string(),
            timeout_ms: 300_000,
        }
    }
}

/// One provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderSettings {
    /// Base URL of the API.
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable holding the API key (None for keyless endpoints).
    #[serde(rename = "api-key-env", default)]
    pub api_key_env: Option<String>,
}

impl ProviderSettings {
    fn new(base_url: &str, api_key_env: Option<&str>) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key_env: api_key_env.map(str::to_string),
        }
    }
}

fn default_providers() -> BTreeMap<String, ProviderSettings> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "openai".to_string(),
        ProviderSettings::new("https://api.openai.com/v1", Some("OPENAI_API_KEY")),
    );
    providers.insert(
        "deepseek".to_string(),
        ProviderSettings::new("https://api.deepseek.com/v1", Some("DEEPSEEK_API_KEY")),
    );
    providers.insert(
        "openrouter".to_string(),
        ProviderSettings::new("https://openrouter.ai/api/v1", Some("OPENROUTER_API_KEY")),
    );
    providers.insert(
        "together_ai".to_string(),
        ProviderSettings::new("https://api.together.xyz/v1", Some("TOGETHERAI_API_KEY")),
    );
    providers.insert(
        "ollama".to_string(),
        ProviderSettings::new("http://localhost:11434/v1", None),
    );
    providers.insert(
        "anthropic".to_string(),
        ProviderSettings::new("https://api.anthropic.com/v1", Some("ANTHROPIC_API_KEY")),
    );
    providers
}

impl Settings {
    /// Load settings with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ~/.config/marble/marble.yml
    /// 3. ./marble.yml
    /// 4. Defaults
    pub fn load(settings_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = settings_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load settings from {}", path.display()));
        }

        for candidate in search_paths(dirs::config_dir()) {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(settings) => return Ok(settings),
                Err(e) => log::warn!("Failed to load {}: {}", candidate.display(), e),
            }
        }

        log::info!("No settings file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read settings file")?;
        let mut settings: Self = serde_yaml::from_str(&content).context("Failed to parse settings file")?;

        // Files list only the providers they change; keep the rest.
        for (name, provider) in default_providers() {
            settings.providers.entry(name).or_insert(provider);
        }

        log::info!("Loaded settings from: {}", path.as_ref().display());
        Ok(settings)
    }
}

/// Settings files tried when no explicit path is given, first match wins
fn search_paths(config_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = config_dir {
        paths.push(dir.join("marble").join("marble.yml"));
    }
    paths.push(PathBuf::from("marble.yml"));
    paths
}
