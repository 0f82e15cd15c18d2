use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::normalize::DEFAULT_PLACEHOLDER_TITLES;
use crate::records::LIBRARY_FILE_NAME;

pub const DEFAULT_CONFIG_DIR_NAME: &str = "vibevault";
pub const DEFAULT_CONFIG_FILE_NAME: &str = "vault.yaml";
pub const DEFAULT_CACHE_DIR_NAME: &str = "cache";
pub const DEFAULT_LOG_LEVEL: &str = "warn";
pub const LIBRARY_PATH_ENV: &str = "VIBEVAULT_LIBRARY";

/// `vault.yaml` as written on disk. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder_titles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_restart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Fully resolved settings with absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub config_path: PathBuf,
    pub library_path: PathBuf,
    pub cache_dir: PathBuf,
    pub placeholder_titles: Vec<String>,
    pub confirm_restart: bool,
    pub log_level: Option<String>,
}

impl VaultConfig {
    /// Filter directive for the log subscriber when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = user_config_dir()?;
    Ok(base
        .join(DEFAULT_CONFIG_DIR_NAME)
        .join(DEFAULT_CONFIG_FILE_NAME))
}

pub fn resolve_config_path(config_override: Option<&Path>, launch_cwd: &Path) -> Result<PathBuf> {
    let raw = if let Some(path) = config_override {
        expand_home(&path.to_string_lossy())?
    } else {
        default_config_path()?
    };
    resolve_against_base_path(&raw, launch_cwd)
}

/// Loads and resolves the config; a missing file yields defaults.
pub fn load_config(config_override: Option<&Path>, launch_cwd: &Path) -> Result<VaultConfig> {
    let config_path = resolve_config_path(config_override, launch_cwd)?;
    let file = load_config_file(&config_path)?;
    let library_override = env::var(LIBRARY_PATH_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    resolve_config(file, &config_path, library_override.as_deref(), launch_cwd)
}

pub fn load_config_file(config_path: &Path) -> Result<VaultConfigFile> {
    if !config_path.exists() {
        return Ok(VaultConfigFile::default());
    }
    let config_text = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read vault config at {}", config_path.display()))?;
    if config_text.trim().is_empty() {
        return Ok(VaultConfigFile::default());
    }
    serde_yaml::from_str(&config_text).with_context(|| {
        format!(
            "failed to parse vault config yaml at {}",
            config_path.display()
        )
    })
}

/// Applies defaults. Relative paths in the file resolve against the config
/// file's directory; `library_override` (from the environment) resolves
/// against `launch_cwd` and wins over the file.
pub fn resolve_config(
    file: VaultConfigFile,
    config_path: &Path,
    library_override: Option<&str>,
    launch_cwd: &Path,
) -> Result<VaultConfig> {
    let config_path = resolve_against_base_path(config_path, launch_cwd)?;
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let library_path = match (library_override, file.library_path.as_deref()) {
        (Some(value), _) => resolve_string_path(value, launch_cwd)?,
        (None, Some(value)) => resolve_string_path(value, &config_dir)?,
        (None, None) => config_dir.join(LIBRARY_FILE_NAME),
    };
    let cache_dir = match file.cache_dir.as_deref() {
        Some(value) => resolve_string_path(value, &config_dir)?,
        None => config_dir.join(DEFAULT_CACHE_DIR_NAME),
    };

    let placeholder_titles = file.placeholder_titles.unwrap_or_else(|| {
        DEFAULT_PLACEHOLDER_TITLES
            .iter()
            .map(|title| (*title).to_owned())
            .collect()
    });
    if placeholder_titles.iter().any(|title| title.trim().is_empty()) {
        bail!(
            "vault config {}: placeholder_titles must not contain empty entries",
            config_path.display()
        );
    }

    let log_level = file
        .log_level
        .map(|level| level.trim().to_owned())
        .filter(|level| !level.is_empty());

    Ok(VaultConfig {
        config_path,
        library_path,
        cache_dir,
        placeholder_titles,
        confirm_restart: file.confirm_restart.unwrap_or(true),
        log_level,
    })
}

fn resolve_string_path(value: &str, base_dir: &Path) -> Result<PathBuf> {
    let expanded = expand_home(value)?;
    resolve_against_base_path(&expanded, base_dir)
}

fn resolve_against_base_path(path: &Path, base_dir: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let absolute = if joined.is_absolute() {
        joined
    } else {
        env::current_dir()
            .context("failed to resolve current directory")?
            .join(joined)
    };
    Ok(normalize_path(absolute))
}

fn expand_home(value: &str) -> Result<PathBuf> {
    if !value.starts_with('~') {
        return Ok(PathBuf::from(value));
    }

    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .ok_or_else(|| anyhow!("cannot resolve home directory for path '{value}'"))?;

    if value == "~" {
        return Ok(home);
    }
    if let Some(rest) = value
        .strip_prefix("~/")
        .or_else(|| value.strip_prefix("~\\"))
    {
        return Ok(home.join(rest));
    }
    bail!("unsupported home path syntax: {value}")
}

fn normalize_path(path: PathBuf) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = result.pop();
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

fn user_config_dir() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        if let Some(path) = env::var_os("APPDATA") {
            return Ok(PathBuf::from(path));
        }
        if let Some(home) = env::var_os("USERPROFILE") {
            return Ok(PathBuf::from(home).join("AppData").join("Roaming"));
        }
        bail!("unable to resolve user config directory on Windows");
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = env::var_os("HOME") {
            return Ok(PathBuf::from(home)
                .join("Library")
                .join("Application Support"));
        }
        bail!("unable to resolve HOME for macOS config directory");
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        if let Some(path) = env::var_os("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(path));
        }
        if let Some(home) = env::var_os("HOME") {
            return Ok(PathBuf::from(home).join(".config"));
        }
        bail!("unable to resolve user config directory on unix");
    }
}
