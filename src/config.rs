use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::catalog::MAX_PAGE_SIZE;

pub const DEFAULT_API_URL: &str = "https://comicvine.gamespot.com/api";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub paging: PagingConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingConfig {
  /// Items requested per remote page
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  /// How close to the end of the buffer a reader gets before the next page is fetched
  #[serde(default = "default_prefetch_distance")]
  pub prefetch_distance: usize,
}

impl Default for PagingConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
      prefetch_distance: default_prefetch_distance(),
    }
  }
}

fn default_page_size() -> u32 {
  20
}

fn default_prefetch_distance() -> usize {
  5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/catsync/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Log directory (defaults to $XDG_DATA_HOME/catsync/logs)
  pub directory: Option<PathBuf>,
  /// Filter directives, e.g. "catsync=debug". RUST_LOG takes precedence.
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./catsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/catsync/config.yaml
  ///
  /// Without any file the defaults are used; everything has one.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("catsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("catsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is valid and means all defaults
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.paging.page_size == 0 {
      return Err(eyre!("paging.page_size must be at least 1"));
    }
    if config.paging.page_size > MAX_PAGE_SIZE {
      return Err(eyre!(
        "paging.page_size must be at most {}, got {}",
        MAX_PAGE_SIZE,
        config.paging.page_size
      ));
    }
    Ok(config)
  }

  /// Directory for the rolling log files.
  pub fn log_directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log.directory {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("catsync").join("logs"))
  }

  /// Get the catalog API key from environment variables.
  ///
  /// Checks CATSYNC_API_KEY first, then COMICVINE_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("CATSYNC_API_KEY")
      .or_else(|_| std::env::var("COMICVINE_API_KEY"))
      .map_err(|_| {
        eyre!("API key not found. Set CATSYNC_API_KEY or COMICVINE_API_KEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.url, DEFAULT_API_URL);
    assert_eq!(config.paging.page_size, 20);
    assert_eq!(config.paging.prefetch_distance, 5);
    assert!(config.cache.path.is_none());
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let config = Config::parse(
      r#"
paging:
  page_size: 50
cache:
  path: /tmp/catsync.db
log:
  filter: catsync=debug
"#,
    )
    .unwrap();
    assert_eq!(config.paging.page_size, 50);
    assert_eq!(config.paging.prefetch_distance, 5);
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/catsync.db")));
    assert_eq!(config.log.filter.as_deref(), Some("catsync=debug"));
    assert_eq!(config.api.url, DEFAULT_API_URL);
  }

  #[test]
  fn test_zero_page_size_is_rejected() {
    assert!(Config::parse("paging:\n  page_size: 0\n").is_err());
  }

  #[test]
  fn test_page_size_above_api_limit_is_rejected() {
    let err = Config::parse("paging:\n  page_size: 101\n").unwrap_err();
    assert!(err.to_string().contains("at most 100"));

    let config = Config::parse("paging:\n  page_size: 100\n").unwrap();
    assert_eq!(config.paging.page_size, MAX_PAGE_SIZE);
  }

  #[test]
  fn test_load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "api:\n  url: http://localhost:8080/api\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.api.url, "http://localhost:8080/api");

    assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
  }
}
