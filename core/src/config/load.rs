use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default conductor data directory: ~/.conductor
pub fn get_conductor_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".conductor"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.conductor/config.toml
    let data_dir = get_conductor_data_dir()?;
    let home_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml
    let local_config = Path::new("config.toml");

    let mut cfg = if home_config.exists() {
        load_from_path(&home_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    if is_blank(cfg.storage.directory.as_deref()) {
        cfg.storage.directory = Some(data_dir.join("state").to_string_lossy().to_string());
    }
    if is_blank(cfg.logging.directory.as_deref()) {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok())?;
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    Ok(cfg)
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|s| s.trim().is_empty()).unwrap_or(true)
}

/// Environment variable overrides (highest priority).
pub fn apply_env_overrides(
    cfg: &mut AppConfig,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = var("CONDUCTOR_STORAGE_DIR").filter(|v| !v.trim().is_empty()) {
        cfg.storage.directory = Some(v);
    }
    if let Some(v) = var("CONDUCTOR_MAX_PARALLEL").filter(|v| !v.trim().is_empty()) {
        let n: usize = v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("CONDUCTOR_MAX_PARALLEL must be a number, got '{v}'"))?;
        cfg.orchestrator.max_parallel = n.max(1);
    }
    if let Some(v) = var("CONDUCTOR_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
        cfg.logging.level = v;
    }
    Ok(())
}
