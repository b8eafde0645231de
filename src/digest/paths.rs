use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DigestPaths {
    pub cache_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<DigestPaths> {
    let digest_home = match env::var("DIGEST_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".topic-digest"),
    };
    let cache_dir = env_or_default_path("DIGEST_CACHE_DIR", digest_home.join("cache"));
    let exports_dir = env_or_default_path("DIGEST_EXPORTS_DIR", digest_home.join("exports"));
    let logs_dir = env_or_default_path("DIGEST_LOGS_DIR", digest_home.join("logs"));

    Ok(DigestPaths {
        cache_dir,
        exports_dir,
        logs_dir,
    })
}
