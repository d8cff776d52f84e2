//! Config file discovery.

use std::path::{Path, PathBuf};

use article_unlock::{UnlockConfig, UnlockResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ARTICLE_UNLOCK_CONFIG";

const CONFIG_DIR: &str = ".article-unlock";
const CONFIG_FILE: &str = "config.json";

/// Resolve the config file path: explicit flag, then `ARTICLE_UNLOCK_CONFIG`,
/// then `./.article-unlock/config.json`, then the same under the home directory.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    resolve_in(explicit, std::env::var(CONFIG_ENV).ok(), Path::new("."))
}

fn resolve_in(explicit: Option<&str>, env_path: Option<String>, cwd: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = env_path.filter(|p| !p.is_empty()) {
        return PathBuf::from(env_path);
    }

    let local = cwd.join(CONFIG_DIR).join(CONFIG_FILE);
    if local.exists() {
        return local;
    }

    default_config_path()
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Resolve and load. A missing file yields the defaults.
pub fn load_config(explicit: Option<&str>) -> UnlockResult<(PathBuf, UnlockConfig)> {
    let path = resolve_config_path(explicit);
    let config = UnlockConfig::load(&path)?;
    Ok((path, config))
}
