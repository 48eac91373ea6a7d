//! Model backend configuration
//!
//! Built from an optional TOML file (`[ai]` table) overlaid with environment
//! variables. A fresh config is built for every facade call.

use anyhow::{Context, Result as AnyResult};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ExtractionError, Result};

/// Config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "todo_extract.toml";

/// Directory name under the platform config dir
const CONFIG_SUBDIR: &str = "todo-extract";

const DEFAULT_MODEL: &str = "gemma3:4b";

// ============================================================================
// Provider
// ============================================================================

/// Which text-generation service answers extraction prompts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Provider {
    /// Local Ollama server, no auth
    #[default]
    Ollama,
    /// OpenAI chat completions, bearer key
    OpenAi,
    /// Anthropic messages API, `x-api-key` header
    Anthropic,
    /// Any OpenAI-compatible server at an explicit base URL
    Custom,
}

impl Provider {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "local" => Some(Provider::Ollama),
            "openai" => Some(Provider::OpenAi),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "custom" => Some(Provider::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Custom => "custom",
        }
    }

    /// Base URL used when none is configured
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::Ollama => Some("http://localhost:11434"),
            Provider::OpenAi => Some("https://api.openai.com/v1"),
            Provider::Anthropic => Some("https://api.anthropic.com/v1"),
            Provider::Custom => None,
        }
    }

    /// Provider-specific key variable, consulted after `AI_API_KEY`
    fn key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Provider::OpenAi | Provider::Anthropic)
    }
}

// ============================================================================
// Backend Config
// ============================================================================

/// Sampling parameters forwarded to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 10,
            top_p: 0.8,
            max_tokens: 1024,
            stop: vec!["```".to_string()],
        }
    }
}

/// Everything needed to reach one backend for one call
#[derive(Debug, Clone, PartialEq)]
pub struct AiBackendConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub options: SamplingOptions,
}

impl Default for AiBackendConfig {
    fn default() -> Self {
        Self::new(Provider::default(), DEFAULT_MODEL)
    }
}

impl AiBackendConfig {
    /// Create config with explicit values and default sampling
    pub fn new(provider: Provider, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            api_key: None,
            base_url: None,
            options: SamplingOptions::default(),
        }
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    /// Config file (if any) overlaid with the process environment
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file_path() {
            match load_config_file(&path) {
                Ok(section) => {
                    debug!("Loaded AI config from {}", path.display());
                    config.apply_file(section)?;
                }
                Err(e) => warn!("Ignoring config file {}: {:#}", path.display(), e),
            }
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, section: FileAiSection) -> Result<()> {
        if let Some(p) = section.provider {
            self.provider = parse_provider(&p)?;
        }
        if let Some(m) = section.model {
            self.model = m;
        }
        if section.api_key.is_some() {
            self.api_key = section.api_key;
        }
        if section.base_url.is_some() {
            self.base_url = section.base_url;
        }
        if let Some(v) = section.temperature {
            self.options.temperature = v;
        }
        if let Some(v) = section.top_k {
            self.options.top_k = v;
        }
        if let Some(v) = section.top_p {
            self.options.top_p = v;
        }
        if let Some(v) = section.max_tokens {
            self.options.max_tokens = v;
        }
        if let Some(v) = section.stop {
            self.options.stop = v;
        }
        Ok(())
    }

    /// Overlay variables from `lookup`; empty values count as unset
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(p) = get("AI_PROVIDER") {
            self.provider = parse_provider(&p)?;
        }
        if let Some(m) = get("AI_MODEL") {
            self.model = m;
        }
        if let Some(url) = get("AI_BASE_URL") {
            self.base_url = Some(url);
        }

        let key = get("AI_API_KEY").or_else(|| self.provider.key_env().and_then(|n| get(n)));
        if key.is_some() {
            self.api_key = key;
        }

        if let Some(v) = get("AI_TEMPERATURE").and_then(|v| parse_number("AI_TEMPERATURE", &v)) {
            self.options.temperature = v;
        }
        if let Some(v) = get("AI_TOP_K").and_then(|v| parse_number("AI_TOP_K", &v)) {
            self.options.top_k = v;
        }
        if let Some(v) = get("AI_TOP_P").and_then(|v| parse_number("AI_TOP_P", &v)) {
            self.options.top_p = v;
        }
        if let Some(v) = get("AI_MAX_TOKENS").and_then(|v| parse_number("AI_MAX_TOKENS", &v)) {
            self.options.max_tokens = v;
        }
        if let Some(v) = get("AI_STOP") {
            self.options.stop = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Check that the selected provider has what it needs
    pub fn validate(&self) -> Result<()> {
        if self.provider.requires_api_key()
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(ExtractionError::BackendConfig(format!(
                "{} requires an API key",
                self.provider.as_str()
            )));
        }
        self.base_url().map(|_| ())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> Result<String> {
        let url = match (&self.base_url, self.provider.default_base_url()) {
            (Some(url), _) => url.as_str(),
            (None, Some(default)) => default,
            (None, None) => {
                return Err(ExtractionError::BackendConfig(format!(
                    "{} provider requires AI_BASE_URL",
                    self.provider.as_str()
                )))
            }
        };
        Ok(url.trim_end_matches('/').to_string())
    }
}

fn parse_provider(s: &str) -> Result<Provider> {
    Provider::parse(s)
        .ok_or_else(|| ExtractionError::BackendConfig(format!("unsupported AI provider: {}", s)))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", name, value);
            None
        }
    }
}

// ============================================================================
// Config File
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    ai: FileAiSection,
}

/// `[ai]` table of the config file; every key optional
#[derive(Debug, Default, Deserialize)]
pub struct FileAiSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

/// `./todo_extract.toml`, else `<config dir>/todo-extract/config.toml`, if either exists
pub fn config_file_path() -> Option<PathBuf> {
    let local = std::env::current_dir()
        .map(|p| p.join(LOCAL_CONFIG_FILE))
        .unwrap_or_else(|_| PathBuf::from(LOCAL_CONFIG_FILE));
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|p| p.join(CONFIG_SUBDIR).join("config.toml"))
        .filter(|p| p.exists())
}

/// Read the `[ai]` table from a TOML file
pub fn load_config_file(path: &Path) -> AnyResult<FileAiSection> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))
}

fn parse_config_str(content: &str) -> AnyResult<FileAiSection> {
    let file: FileConfig = toml::from_str(content)?;
    Ok(file.ai)
}
