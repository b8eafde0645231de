use crate::error::DigestError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub gap_hours: f64,
    pub context_window: usize,
    pub overlap_threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            gap_hours: 4.0,
            context_window: 15,
            overlap_threshold: 0.4,
        }
    }
}

impl ClusteringConfig {
    pub fn gap_seconds(&self) -> f64 {
        self.gap_hours * 3600.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub claude_bin: Option<PathBuf>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub lmstudio_url: String,
    pub lmstudio_model: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "cli".to_string(),
            model: None,
            api_key: None,
            api_base: "https://api.anthropic.com".to_string(),
            claude_bin: None,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1".to_string(),
            lmstudio_url: "http://localhost:1234".to_string(),
            lmstudio_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub token: Option<String>,
    pub history_days: u64,
    pub rate_limit_ms: u64,
    pub api_base: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: None,
            history_days: 90,
            rate_limit_ms: 1_200,
            api_base: "https://slack.com/api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DigestConfig {
    pub clustering: ClusteringConfig,
    pub provider: ProviderConfig,
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDigestConfig {
    clustering: Option<ClusteringConfig>,
    provider: Option<ProviderConfig>,
    slack: Option<SlackConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_first(vars: &[&str]) -> Option<String> {
    vars.iter().find_map(|var| env_non_empty(var))
}

pub fn validate(cfg: &DigestConfig) -> Result<()> {
    let c = &cfg.clustering;
    if !(c.gap_hours > 0.0 && c.gap_hours.is_finite()) {
        return Err(DigestError::InvalidConfig("cluster gap hours must be > 0".to_string()).into());
    }
    if !(c.overlap_threshold > 0.0 && c.overlap_threshold <= 1.0) {
        return Err(DigestError::InvalidConfig(
            "overlap threshold: require 0 < threshold <= 1.0".to_string(),
        )
        .into());
    }
    if c.context_window == 0 {
        return Err(
            DigestError::InvalidConfig("context window must be >= 1 message".to_string()).into(),
        );
    }
    if cfg.slack.history_days == 0 {
        return Err(
            DigestError::InvalidConfig("slack history days must be >= 1".to_string()).into(),
        );
    }
    if cfg.provider.kind.trim().is_empty() {
        return Err(DigestError::InvalidConfig("provider kind cannot be empty".to_string()).into());
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_non_empty("DIGEST_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }

    let base = dirs::config_dir()?;
    Some(base.join("topic-digest").join("digest.toml"))
}

fn merge_file_config(base: &mut DigestConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialDigestConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse digest config {}: {err}", path.display()))?;
    if let Some(clustering) = parsed.clustering {
        base.clustering = clustering;
    }
    if let Some(provider) = parsed.provider {
        base.provider = provider;
    }
    if let Some(slack) = parsed.slack {
        base.slack = slack;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut DigestConfig) {
    cfg.clustering.gap_hours = env_or_f64("DIGEST_CLUSTER_GAP_HOURS", cfg.clustering.gap_hours);
    cfg.clustering.context_window = env_or_u64(
        "DIGEST_CONTEXT_WINDOW",
        cfg.clustering.context_window as u64,
    ) as usize;
    cfg.clustering.overlap_threshold = env_or_f64(
        "DIGEST_OVERLAP_THRESHOLD",
        cfg.clustering.overlap_threshold,
    );

    let p = &mut cfg.provider;
    p.kind = env_or_string("DIGEST_PROVIDER", &p.kind);
    p.model = env_non_empty("DIGEST_MODEL").or(p.model.take());
    p.api_key = env_first(&["DIGEST_API_KEY", "ANTHROPIC_API_KEY"]).or(p.api_key.take());
    p.api_base = env_or_string("DIGEST_API_BASE", &p.api_base);
    p.claude_bin = env_non_empty("DIGEST_CLAUDE_BIN")
        .map(PathBuf::from)
        .or(p.claude_bin.take());
    p.ollama_url = env_or_string("DIGEST_OLLAMA_URL", &p.ollama_url);
    p.ollama_model = env_or_string("DIGEST_OLLAMA_MODEL", &p.ollama_model);
    p.lmstudio_url = env_or_string("DIGEST_LMSTUDIO_URL", &p.lmstudio_url);
    p.lmstudio_model = env_non_empty("DIGEST_LMSTUDIO_MODEL").or(p.lmstudio_model.take());

    let s = &mut cfg.slack;
    s.token = env_first(&["DIGEST_SLACK_TOKEN", "SLACK_TOKEN"]).or(s.token.take());
    s.history_days = env_or_u64("DIGEST_HISTORY_DAYS", s.history_days);
    s.rate_limit_ms = env_or_u64("DIGEST_SLACK_RATE_LIMIT_MS", s.rate_limit_ms);
    s.api_base = env_or_string("DIGEST_SLACK_API_BASE", &s.api_base);
}

/// Defaults, then the optional TOML file, then `DIGEST_*` env vars.
/// Callers apply CLI flags on top and call [`validate`] again.
pub fn load_config() -> Result<DigestConfig> {
    let mut cfg = DigestConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
