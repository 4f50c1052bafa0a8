//! Forge configuration stored in `forge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::provider::{Provider, RequestProfile};
use crate::error::ForgeError;

pub const DEFAULT_CONFIG_FILE: &str = "forge.toml";

/// Forge configuration (TOML).
///
/// Every field has a default, so an empty or missing file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Directory the generated project is written to.
    pub output_dir: PathBuf,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub schedule: ScheduleConfig,
    pub project: ProjectConfig,
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: Provider,
    pub model: String,
    pub max_output_tokens: u32,
    /// Environment variable holding the API key. Never store the key itself here.
    pub api_key_env: String,
    /// Output ceiling for routing calls, which only answer with a single token.
    pub routing_max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts in total when the provider keeps answering 429.
    pub max_retries: u32,
    pub base_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Items at this depth or deeper are finalized without routing.
    pub max_depth: u32,
    pub max_concurrency: usize,
    /// Upper bound on rendered prompt size; droppable sections go first.
    pub prompt_budget_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub blueprint_attempts: u32,
    pub unit_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    pub max_rounds: u32,
    /// Build command run inside `output_dir` (e.g. `["bun","run","build"]`).
    pub build_command: Vec<String>,
    pub build_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("my-react-app"),
            generation: GenerationConfig::default(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
            project: ProjectConfig::default(),
            repair: RepairConfig::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_output_tokens: 8192,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            routing_max_output_tokens: 16,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 4,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_concurrency: 8,
            prompt_budget_bytes: 48_000,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            blueprint_attempts: 2,
            unit_attempts: 2,
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            build_command: vec!["bun".to_string(), "run".to_string(), "build".to_string()],
            build_timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("output_dir must be non-empty"));
        }
        if self.generation.model.trim().is_empty() {
            return Err(anyhow!("generation.model must be non-empty"));
        }
        if self.generation.max_output_tokens == 0 || self.generation.routing_max_output_tokens == 0
        {
            return Err(anyhow!("generation token limits must be > 0"));
        }
        if self.generation.api_key_env.trim().is_empty() {
            return Err(anyhow!("generation.api_key_env must be non-empty"));
        }
        if self.retry.max_retries == 0 {
            return Err(anyhow!("retry.max_retries must be > 0"));
        }
        if self.schedule.max_concurrency == 0 {
            return Err(anyhow!("schedule.max_concurrency must be > 0"));
        }
        if self.schedule.prompt_budget_bytes == 0 {
            return Err(anyhow!("schedule.prompt_budget_bytes must be > 0"));
        }
        if self.project.blueprint_attempts == 0 || self.project.unit_attempts == 0 {
            return Err(anyhow!("project attempt limits must be > 0"));
        }
        if self.repair.build_timeout_secs == 0 || self.repair.output_limit_bytes == 0 {
            return Err(anyhow!("repair timeout and output limit must be > 0"));
        }
        if self.repair.build_command.is_empty() || self.repair.build_command[0].trim().is_empty() {
            return Err(anyhow!("repair.build_command must be a non-empty array"));
        }
        Ok(())
    }

    /// Build the generation profile, reading the API key from the configured variable.
    pub fn request_profile(&self) -> Result<RequestProfile, ForgeError> {
        let key = std::env::var(&self.generation.api_key_env).map_err(|_| {
            ForgeError::Config(format!(
                "environment variable {} is not set",
                self.generation.api_key_env
            ))
        })?;
        self.request_profile_with_key(key)
    }

    pub fn request_profile_with_key(&self, key: String) -> Result<RequestProfile, ForgeError> {
        if key.trim().is_empty() {
            return Err(ForgeError::Config(format!(
                "environment variable {} is empty",
                self.generation.api_key_env
            )));
        }
        RequestProfile::new(
            self.generation.provider,
            self.generation.model.clone(),
            self.generation.max_output_tokens,
            key,
        )
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.retry.base_delay_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.repair.build_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
