//! Example configuration: defaults, optional TOML file, env overrides.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExampleConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub single: SingleCallConfig,
    #[serde(default)]
    pub stream: StreamCallConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The non-streaming call.
#[derive(Debug, Clone, Deserialize)]
pub struct SingleCallConfig {
    #[serde(default = "default_single_model")]
    pub model: String,
    #[serde(default = "default_single_prompt")]
    pub prompt: String,
}

impl Default for SingleCallConfig {
    fn default() -> Self {
        Self {
            model: default_single_model(),
            prompt: default_single_prompt(),
        }
    }
}

/// The streaming call; defaults to the free-tier model.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamCallConfig {
    #[serde(default = "default_stream_model")]
    pub model: String,
    #[serde(default = "default_stream_prompt")]
    pub prompt: String,
}

impl Default for StreamCallConfig {
    fn default() -> Self {
        Self {
            model: default_stream_model(),
            prompt: default_stream_prompt(),
        }
    }
}

fn default_api_base() -> String {
    zai_llm::DEFAULT_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    zai_llm::DEFAULT_TIMEOUT.as_secs()
}

fn default_single_model() -> String {
    "zai/glm-4.6".to_string()
}

fn default_single_prompt() -> String {
    "Hello from LiteLLM! Please respond briefly.".to_string()
}

fn default_stream_model() -> String {
    "zai/glm-4.5-flash".to_string()
}

fn default_stream_prompt() -> String {
    "Count from 1 to 5.".to_string()
}

impl ExampleConfig {
    /// Loads `path` when given (defaults otherwise), then applies env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("read config {}: {e}", path.display())
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        tracing::debug!(
            api_base = %cfg.provider.api_base,
            single_model = %cfg.single.model,
            stream_model = %cfg.stream.model,
            "config loaded"
        );
        Ok(cfg)
    }

    /// Like [`Self::load`], but a bad file is logged and the defaults are used instead.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "config rejected; continuing with defaults");
                let mut cfg = Self::default();
                cfg.apply_overrides(|key| std::env::var(key).ok());
                cfg
            }
        }
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).map_err(|e| anyhow::anyhow!("parse config: {e}"))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_blank("ZAI_API_BASE") {
            self.provider.api_base = v;
        }
        if let Some(v) = non_blank("ZAI_MODEL") {
            self.single.model = v;
        }
        if let Some(v) = non_blank("ZAI_STREAM_MODEL") {
            self.stream.model = v;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.provider.api_base.trim().is_empty() {
            return Err(anyhow::anyhow!("provider.api_base is required"));
        }
        if self.provider.timeout_secs == 0 {
            return Err(anyhow::anyhow!("provider.timeout_secs must be > 0"));
        }
        let calls = [
            ("single", &self.single.model, &self.single.prompt),
            ("stream", &self.stream.model, &self.stream.prompt),
        ];
        for (name, model, prompt) in calls {
            if model.trim().is_empty() {
                return Err(anyhow::anyhow!("{name}.model is required"));
            }
            if prompt.trim().is_empty() {
                return Err(anyhow::anyhow!("{name}.prompt is required"));
            }
        }
        Ok(())
    }
}
