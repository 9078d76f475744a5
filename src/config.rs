use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::Purpose;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Name shown as the notification title when a push carries none
  pub app_name: String,
  pub cache: CacheConfig,
  pub shell: ShellConfig,
  pub routing: RoutingConfig,
  pub sync: SyncConfig,
  pub push: PushConfig,
  pub share: ShareConfig,
  pub network: NetworkConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every partition this worker owns
  pub prefix: String,
  /// Version tag embedded in the current partition names
  pub version: String,
  /// Entry cap for the dynamic partition (0 = unbounded)
  pub dynamic_max_entries: usize,
  /// Entry cap for the api partition (0 = unbounded)
  pub api_max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Origin that relative shell paths are resolved against
  pub origin: String,
  /// The app-shell document served for offline navigations
  pub document: String,
  /// Assets fetched into the static partition on install
  pub precache: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
  pub static_suffixes: Vec<String>,
  pub font_hosts: Vec<String>,
  /// Hostname fragments routed to the api partition
  pub api_hosts: Vec<String>,
  pub api_path_marker: String,
  pub document_store_host: String,
  /// Image extensions without the leading dot, matched case-insensitively
  pub image_extensions: Vec<String>,
  pub image_hosts: Vec<String>,
  /// URL fragments whose successful api responses may be cached
  pub safe_to_cache: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub tag: String,
  pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  pub default_body: String,
  pub default_tag: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
  pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database path (default: $XDG_DATA_HOME/shellcache/worker.db)
  pub path: Option<PathBuf>,
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "TravelAI Pro".to_string(),
      cache: CacheConfig::default(),
      shell: ShellConfig::default(),
      routing: RoutingConfig::default(),
      sync: SyncConfig::default(),
      push: PushConfig::default(),
      share: ShareConfig::default(),
      network: NetworkConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "travelai-".to_string(),
      version: "v1".to_string(),
      dynamic_max_entries: 200,
      api_max_entries: 100,
    }
  }
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      document: "/ultimate-travel-app.html".to_string(),
      precache: strings(&[
        "/ultimate-travel-app.html",
        "/real-production-api.js",
        "/manifest.json",
        "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700;800;900&display=swap",
        "https://fonts.googleapis.com/css2?family=JetBrains+Mono:wght@400;500;600&display=swap",
      ]),
    }
  }
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      static_suffixes: strings(&[".css", ".js", ".json"]),
      font_hosts: strings(&["fonts.googleapis.com", "fonts.gstatic.com"]),
      api_hosts: strings(&[
        "api.open-meteo.com",
        "nominatim.openstreetmap.org",
        "api.geoapify.com",
        "overpass-api.de",
        "images.unsplash.com",
      ]),
      api_path_marker: "/api/".to_string(),
      document_store_host: "data.mongodb-api.com".to_string(),
      image_extensions: strings(&["jpg", "jpeg", "png", "gif", "webp", "svg"]),
      image_hosts: strings(&["images.unsplash.com"]),
      safe_to_cache: strings(&[
        "open-meteo.com",
        "nominatim.openstreetmap.org",
        "api.geoapify.com",
        "overpass-api.de",
      ]),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-search-history".to_string(),
      endpoint: "/api/sync-searches".to_string(),
    }
  }
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      default_body: "New travel update available".to_string(),
      default_tag: "travel-update".to_string(),
      icon: "/icon-192.png".to_string(),
      badge: "/badge-72.png".to_string(),
      vibrate: vec![200, 100, 200],
    }
  }
}

impl Default for ShareConfig {
  fn default() -> Self {
    Self {
      path: "/share-target".to_string(),
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 10 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin()?;
    if self.cache.version.is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    Ok(())
  }

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.shell.origin)
      .map_err(|e| eyre!("Invalid shell origin {}: {}", self.shell.origin, e))
  }

  /// Resolve a path (or absolute URL) against the shell origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }

  /// Name of the current partition for the given purpose, e.g. `travelai-static-v1`.
  pub fn partition_name(&self, purpose: Purpose) -> String {
    format!(
      "{}{}-{}",
      self.cache.prefix,
      purpose.as_str(),
      self.cache.version
    )
  }

  /// The three partition names of the current version.
  pub fn current_partitions(&self) -> [String; 3] {
    [
      self.partition_name(Purpose::Static),
      self.partition_name(Purpose::Dynamic),
      self.partition_name(Purpose::Api),
    ]
  }

  /// Entry cap for a partition purpose, `None` when unbounded.
  pub fn max_entries(&self, purpose: Purpose) -> Option<usize> {
    let cap = match purpose {
      Purpose::Static => 0,
      Purpose::Dynamic => self.cache.dynamic_max_entries,
      Purpose::Api => self.cache.api_max_entries,
    };
    (cap > 0).then_some(cap)
  }

  /// Get the database path, honoring the SHELLCACHE_DB environment variable.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Ok(p) = std::env::var("SHELLCACHE_DB") {
      return Ok(PathBuf::from(p));
    }
    if let Some(p) = &self.storage.path {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("worker.db"))
  }
}

/// Directory holding the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("shellcache"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_describe_travel_app() {
    let config = Config::default();
    assert_eq!(
      config.current_partitions(),
      [
        "travelai-static-v1".to_string(),
        "travelai-dynamic-v1".to_string(),
        "travelai-api-v1".to_string(),
      ]
    );
    assert_eq!(config.sync.tag, "sync-search-history");
    assert_eq!(config.max_entries(Purpose::Static), None);
    assert_eq!(config.max_entries(Purpose::Api), Some(100));
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
app_name: Trips
cache:
  version: v2
  api_max_entries: 0
shell:
  origin: https://trips.example
"#,
    )
    .unwrap();

    assert_eq!(config.app_name, "Trips");
    assert_eq!(config.partition_name(Purpose::Dynamic), "travelai-dynamic-v2");
    assert_eq!(config.max_entries(Purpose::Api), None);
    assert_eq!(config.shell.document, "/ultimate-travel-app.html");
    assert_eq!(
      config.resolve("/manifest.json").unwrap().as_str(),
      "https://trips.example/manifest.json"
    );
  }

  #[test]
  fn test_resolve_keeps_absolute_urls() {
    let config = Config::default();
    let url = config.resolve("https://fonts.gstatic.com/a.woff2").unwrap();
    assert_eq!(url.host_str(), Some("fonts.gstatic.com"));
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache:\n  prefix: \"\"\n  version: v9").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.partition_name(Purpose::Static), "static-v9");
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let result = Config::load(Some(Path::new("/nonexistent/shellcache.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_invalid_origin_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "shell:\n  origin: not a url").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }
}
