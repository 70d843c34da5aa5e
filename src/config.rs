use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the guide is served from; relative paths resolve against it
  pub origin: String,
  /// Address contact messages and booking inquiries are sent to
  pub recipient: String,
  /// Database file (defaults to $XDG_DATA_HOME/kalavrita/offline.db)
  pub database: Option<PathBuf>,
  pub request_timeout_ms: u64,
  pub cache: CacheConfig,
  pub outbox: OutboxConfig,
  pub connectivity: ConnectivityConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      recipient: "hello@forcehook.com".to_string(),
      database: None,
      request_timeout_ms: 10_000,
      cache: CacheConfig::default(),
      outbox: OutboxConfig::default(),
      connectivity: ConnectivityConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition name prefix
  pub prefix: String,
  /// Worker version; part of both partition names
  pub version: String,
  /// Shell resources seeded at install time
  pub shell: Vec<String>,
  /// Document served to offline navigations with nothing cached
  pub fallback_document: String,
  /// Bound on the dynamic partition (0 or unset = unbounded)
  pub dynamic_max_entries: Option<usize>,
  /// Activate a freshly installed worker without waiting
  pub skip_waiting: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "kalavrita".to_string(),
      version: "v1.0.0".to_string(),
      shell: [
        "/",
        "/index.html",
        "/manifest.json",
        "/styles/main.css",
        "/styles/components.css",
        "/styles/responsive.css",
        "/js/app.js",
        "/js/data.js",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      fallback_document: "/index.html".to_string(),
      dynamic_max_entries: Some(200),
      skip_waiting: true,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
  /// POST to the configured endpoint
  Http,
  /// Local stand-in that always delivers (there is no real mail backend)
  #[default]
  Simulated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
  /// Submission endpoint path
  pub endpoint: String,
  pub transport: TransportKind,
  /// Delay before the startup drain
  pub drain_delay_ms: u64,
}

impl Default for OutboxConfig {
  fn default() -> Self {
    Self {
      endpoint: "/api/contact".to_string(),
      transport: TransportKind::default(),
      drain_delay_ms: 2000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// How often `watch` probes the origin
  pub poll_interval_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 5000,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kalavrita.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kalavrita/config.yaml
  ///
  /// Without any file the defaults are used.
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
    let local = PathBuf::from("kalavrita.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kalavrita").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Absolute submission endpoint.
  pub fn endpoint_url(&self) -> Result<Url> {
    self
      .origin_url()?
      .join(&self.outbox.endpoint)
      .map_err(|e| eyre!("Invalid endpoint '{}': {}", self.outbox.endpoint, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}
