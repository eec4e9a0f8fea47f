use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    pub workers: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_passes: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            max_retries: 3,
            backoff_ms: 1_000,
            max_passes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub api_base_url: String,
    pub snapshot_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://v0.api.niklas-luhmann-archiv.de/ZK/zettel/".to_string(),
            snapshot_base_url: "https://niklas-luhmann-archiv.de/bestand/zettelkasten/zettel/"
                .to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterSettings {
    pub bin: String,
    pub timeout_secs: u64,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            bin: "pandoc".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiverConfig {
    pub runner: RunnerSettings,
    pub remote: RemoteSettings,
    pub converter: ConverterSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchiverConfig {
    runner: Option<RunnerSettings>,
    remote: Option<RemoteSettings>,
    converter: Option<ConverterSettings>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &ArchiverConfig) -> Result<()> {
    if cfg.runner.workers == 0 {
        return Err(anyhow!("invalid worker count: must be >= 1"));
    }
    if cfg.runner.max_passes == 0 {
        return Err(anyhow!("invalid max passes: must be >= 1"));
    }
    if cfg.remote.request_timeout_secs == 0 {
        return Err(anyhow!("invalid request timeout: must be >= 1 second"));
    }
    if cfg.remote.api_base_url.trim().is_empty() {
        return Err(anyhow!("invalid api base url: cannot be empty"));
    }
    if cfg.remote.snapshot_base_url.trim().is_empty() {
        return Err(anyhow!("invalid snapshot base url: cannot be empty"));
    }
    if cfg.converter.bin.trim().is_empty() {
        return Err(anyhow!("invalid converter binary: cannot be empty"));
    }
    if cfg.converter.timeout_secs == 0 {
        return Err(anyhow!("invalid converter timeout: must be >= 1 second"));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("ZKARCH_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".zettel-archiver").join("config.toml"))
}

fn merge_file_config(base: &mut ArchiverConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialArchiverConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse archiver config {}: {err}", path.display()))?;
    if let Some(runner) = parsed.runner {
        base.runner = runner;
    }
    if let Some(remote) = parsed.remote {
        base.remote = remote;
    }
    if let Some(converter) = parsed.converter {
        base.converter = converter;
    }
    Ok(())
}

pub fn load_config() -> Result<ArchiverConfig> {
    let mut cfg = ArchiverConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.runner.workers = env_or_usize("ZKARCH_WORKERS", cfg.runner.workers);
    cfg.runner.max_retries = env_or_u32("ZKARCH_MAX_RETRIES", cfg.runner.max_retries);
    cfg.runner.backoff_ms = env_or_u64("ZKARCH_BACKOFF_MS", cfg.runner.backoff_ms);
    cfg.runner.max_passes = env_or_u32("ZKARCH_MAX_PASSES", cfg.runner.max_passes);
    cfg.remote.api_base_url = env_or_string("ZKARCH_API_BASE_URL", &cfg.remote.api_base_url);
    cfg.remote.snapshot_base_url =
        env_or_string("ZKARCH_SNAPSHOT_BASE_URL", &cfg.remote.snapshot_base_url);
    cfg.remote.request_timeout_secs = env_or_u64(
        "ZKARCH_REQUEST_TIMEOUT_SECS",
        cfg.remote.request_timeout_secs,
    );
    cfg.converter.bin = env_or_string("ZKARCH_CONVERTER_BIN", &cfg.converter.bin);
    cfg.converter.timeout_secs =
        env_or_u64("ZKARCH_CONVERTER_TIMEOUT_SECS", cfg.converter.timeout_secs);

    validate(&cfg)?;
    Ok(cfg)
}
