//! Resolved runtime configuration.
//!
//! A [`Config`] is built once per invocation and handed to each component.
//! Values are layered, lowest priority first: built-in defaults, settings
//! stored in `config.redb`, `FORUMRAG_<KEY>` environment variables, and
//! finally command-line overrides applied by the caller via
//! [`Config::apply`].

use std::time::Duration;

use serde::Serialize;

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
    generation::GenerateOptions,
    vector_store::Metric,
};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_GENERATE_MODEL: &str = "qwen2.5:3b";
pub const DEFAULT_SITE_URL: &str = "https://discourse.onlinedegree.iitm.ac.in";
pub const DEFAULT_CORPUS_WINDOW: &str = "January 1 to April 15, 2025";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_PREVIEW_CHARS: usize = 200;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const ENV_PREFIX: &str = "FORUMRAG_";

/// Names of the settings understood by `forumrag config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    OllamaUrl,
    EmbedModel,
    GenerateModel,
    SiteUrl,
    CorpusWindow,
    Metric,
    TopK,
    PreviewChars,
    Temperature,
    MaxTokens,
    TimeoutSecs,
}

impl SettingKey {
    pub const ALL: [SettingKey; 11] = [
        SettingKey::OllamaUrl,
        SettingKey::EmbedModel,
        SettingKey::GenerateModel,
        SettingKey::SiteUrl,
        SettingKey::CorpusWindow,
        SettingKey::Metric,
        SettingKey::TopK,
        SettingKey::PreviewChars,
        SettingKey::Temperature,
        SettingKey::MaxTokens,
        SettingKey::TimeoutSecs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::OllamaUrl => "ollama_url",
            SettingKey::EmbedModel => "embed_model",
            SettingKey::GenerateModel => "generate_model",
            SettingKey::SiteUrl => "site_url",
            SettingKey::CorpusWindow => "corpus_window",
            SettingKey::Metric => "metric",
            SettingKey::TopK => "top_k",
            SettingKey::PreviewChars => "preview_chars",
            SettingKey::Temperature => "temperature",
            SettingKey::MaxTokens => "max_tokens",
            SettingKey::TimeoutSecs => "timeout_secs",
        }
    }

    /// Environment variable overriding this setting, e.g. `FORUMRAG_TOP_K`.
    pub fn env_var(self) -> String {
        format!("{ENV_PREFIX}{}", self.name().to_ascii_uppercase())
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> =
                    Self::ALL.iter().map(|k| k.name()).collect();
                Error::Validation(format!(
                    "unknown setting '{name}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub ollama_url: String,
    pub embed_model: String,
    pub generate_model: String,
    pub site_url: String,
    pub corpus_window: String,
    pub metric: Metric,
    pub top_k: usize,
    pub preview_chars: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            generate_model: DEFAULT_GENERATE_MODEL.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            corpus_window: DEFAULT_CORPUS_WINDOW.to_string(),
            metric: Metric::Cosine,
            top_k: DEFAULT_TOP_K,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Resolve defaults, stored settings and environment overrides.
    pub fn resolve(config_db: &ConfigDb) -> Result<Self> {
        Self::resolve_with(config_db, |var| std::env::var(var).ok())
    }

    fn resolve_with(
        config_db: &ConfigDb,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        for key in SettingKey::ALL {
            if let Some(value) = config_db.get_setting(key.name())? {
                config.apply(key, &value).map_err(|e| {
                    Error::Config(format!("stored setting is invalid: {e}"))
                })?;
            }
            let var = key.env_var();
            if let Some(value) = env(&var) {
                config.apply(key, &value).map_err(|e| {
                    Error::Config(format!("{var} is invalid: {e}"))
                })?;
            }
        }

        Ok(config)
    }

    /// Parse `value` into the field named by `key`.
    pub fn apply(&mut self, key: SettingKey, value: &str) -> Result<()> {
        let value = value.trim();
        let invalid = || {
            Error::Validation(format!(
                "invalid value for {}: '{value}'",
                key.name()
            ))
        };

        match key {
            SettingKey::OllamaUrl => self.ollama_url = non_empty(value, key)?,
            SettingKey::EmbedModel => {
                self.embed_model = non_empty(value, key)?
            }
            SettingKey::GenerateModel => {
                self.generate_model = non_empty(value, key)?
            }
            SettingKey::SiteUrl => self.site_url = non_empty(value, key)?,
            SettingKey::CorpusWindow => {
                self.corpus_window = non_empty(value, key)?
            }
            SettingKey::Metric => self.metric = value.parse()?,
            SettingKey::TopK => {
                self.top_k = value
                    .parse()
                    .ok()
                    .filter(|k| *k > 0)
                    .ok_or_else(invalid)?
            }
            SettingKey::PreviewChars => {
                self.preview_chars = value
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(invalid)?
            }
            SettingKey::Temperature => {
                self.temperature = value
                    .parse::<f32>()
                    .ok()
                    .filter(|t| t.is_finite() && *t >= 0.0)
                    .ok_or_else(invalid)?
            }
            SettingKey::MaxTokens => {
                self.max_tokens = value.parse().map_err(|_| invalid())?
            }
            SettingKey::TimeoutSecs => {
                self.timeout_secs = value
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(invalid)?
            }
        }
        Ok(())
    }

    /// Current value of `key`, formatted the way `apply` accepts it.
    pub fn get(&self, key: SettingKey) -> String {
        match key {
            SettingKey::OllamaUrl => self.ollama_url.clone(),
            SettingKey::EmbedModel => self.embed_model.clone(),
            SettingKey::GenerateModel => self.generate_model.clone(),
            SettingKey::SiteUrl => self.site_url.clone(),
            SettingKey::CorpusWindow => self.corpus_window.clone(),
            SettingKey::Metric => self.metric.to_string(),
            SettingKey::TopK => self.top_k.to_string(),
            SettingKey::PreviewChars => self.preview_chars.to_string(),
            SettingKey::Temperature => self.temperature.to_string(),
            SettingKey::MaxTokens => self.max_tokens.to_string(),
            SettingKey::TimeoutSecs => self.timeout_secs.to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

fn non_empty(value: &str, key: SettingKey) -> Result<String> {
    if value.is_empty() {
        return Err(Error::Validation(format!(
            "{} must not be empty",
            key.name()
        )));
    }
    Ok(value.to_string())
}
