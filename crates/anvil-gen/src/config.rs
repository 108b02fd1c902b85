//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `ANVIL_{PROVIDER}_API_KEY`
//! 2. Project-local: `.anvil/config.toml`
//! 3. Global: `~/.anvil/config.toml`

use crate::poller::{PollOptions, DEFAULT_MESH_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_SLOW_TIMEOUT};
use crate::request::DEFAULT_RIG_HEIGHT_METERS;
use anvil_core::{ClassifiedError, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Providers whose API keys may come from the environment
pub const KNOWN_PROVIDERS: [&str; 3] = ["meshy", "enhancer", "avatar"];

/// Provider-specific configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `[pipeline]` section; unset fields fall through to the layer below
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub mesh_timeout_ms: Option<u64>,
    #[serde(default)]
    pub slow_timeout_ms: Option<u64>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub rig_height_meters: Option<f32>,
}

/// `[retry]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnvilConfigFile {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct AnvilConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
}

impl AnvilConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = AnvilConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        let local_path = PathBuf::from(".anvil/config.toml");
        if local_path.exists() {
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        Self::apply_env_overrides(&mut config);
        let config = Self::resolve(config);
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific file path only
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config);
        let config = Self::resolve(config);
        config.validate()?;
        Ok(config)
    }

    /// Reject timing values that would busy-poll providers or make retry
    /// delays shrink
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.poll_interval_ms == Some(0) {
            return Err(ClassifiedError::validation(
                Some("pipeline.poll_interval_ms"),
                "poll_interval_ms must be greater than 0",
            ));
        }
        if let Some(multiplier) = self.retry.backoff_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(ClassifiedError::validation(
                    Some("retry.backoff_multiplier"),
                    format!("backoff_multiplier must be at least 1.0, got {}", multiplier),
                ));
            }
        }
        let policy = self.retry_policy();
        if policy.max_delay < policy.base_delay {
            return Err(ClassifiedError::validation(
                Some("retry.max_delay_ms"),
                format!(
                    "max_delay_ms ({}) must not be below base_delay_ms ({})",
                    policy.max_delay.as_millis(),
                    policy.base_delay.as_millis()
                ),
            ));
        }
        Ok(())
    }

    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_key.as_deref())
    }

    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    /// Providers are enabled unless a layer says otherwise
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .and_then(|p| p.enabled)
            .unwrap_or(true)
    }

    pub fn default_provider(&self) -> &str {
        self.pipeline.default_provider.as_deref().unwrap_or("meshy")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.pipeline
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("generated"))
    }

    pub fn rig_height_meters(&self) -> f32 {
        self.pipeline
            .rig_height_meters
            .unwrap_or(DEFAULT_RIG_HEIGHT_METERS)
    }

    /// Poll options for mesh and rigging stages
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.poll_interval(),
            timeout: self
                .pipeline
                .mesh_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MESH_TIMEOUT),
        }
    }

    /// Poll options for slow stages such as retexturing
    pub fn slow_poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.poll_interval(),
            timeout: self
                .pipeline
                .slow_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SLOW_TIMEOUT),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            backoff_multiplier: self
                .retry
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            max_delay: self
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    fn poll_interval(&self) -> Duration {
        self.pipeline
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".anvil").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<AnvilConfigFile> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifiedError::storage(
                Some("read_config"),
                format!("Failed to read config {}: {}", path.display(), e),
            )
            .with_source(e)
        })?;
        let config: AnvilConfigFile = toml::from_str(&content).map_err(|e| {
            ClassifiedError::validation(
                Some("config"),
                format!("Failed to parse config {}: {}", path.display(), e),
            )
            .with_source(e)
        })?;
        Ok(config)
    }

    fn resolve(file: AnvilConfigFile) -> Self {
        Self {
            providers: file.providers,
            pipeline: file.pipeline,
            retry: file.retry,
        }
    }

    fn merge_into(base: &mut AnvilConfigFile, overlay: AnvilConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() {
                entry.api_key = provider.api_key;
            }
            if provider.api_url.is_some() {
                entry.api_url = provider.api_url;
            }
            if provider.enabled.is_some() {
                entry.enabled = provider.enabled;
            }
        }

        let p = overlay.pipeline;
        let bp = &mut base.pipeline;
        bp.poll_interval_ms = p.poll_interval_ms.or(bp.poll_interval_ms);
        bp.mesh_timeout_ms = p.mesh_timeout_ms.or(bp.mesh_timeout_ms);
        bp.slow_timeout_ms = p.slow_timeout_ms.or(bp.slow_timeout_ms);
        bp.output_dir = p.output_dir.or(bp.output_dir.take());
        bp.default_provider = p.default_provider.or(bp.default_provider.take());
        bp.rig_height_meters = p.rig_height_meters.or(bp.rig_height_meters);

        let r = overlay.retry;
        let br = &mut base.retry;
        br.max_attempts = r.max_attempts.or(br.max_attempts);
        br.base_delay_ms = r.base_delay_ms.or(br.base_delay_ms);
        br.backoff_multiplier = r.backoff_multiplier.or(br.backoff_multiplier);
        br.max_delay_ms = r.max_delay_ms.or(br.max_delay_ms);
    }

    fn apply_env_overrides(config: &mut AnvilConfigFile) {
        for name in &KNOWN_PROVIDERS {
            let env_key = format!("ANVIL_{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&env_key) {
                let entry = config.providers.entry(name.to_string()).or_default();
                entry.api_key = Some(key);
            }
        }
    }
}
