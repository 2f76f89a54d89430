//! Configuration management for ocrx using the prefer crate.
//!
//! A config file is optional. Values are layered: built-in defaults, then the
//! file (explicit `--config` path or discovered by prefer), then environment
//! variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{ExtractOptions, OverflowPolicy, PipelineConfig};

/// Default listen address (all interfaces, port 8000).
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Default port when a bind address names only a host.
pub const DEFAULT_PORT: u16 = 8000;

/// Environment variable overriding the tesseract binary.
pub const ENV_TESSERACT: &str = "OCRX_TESSERACT";
/// Environment variable overriding the bind address.
pub const ENV_BIND: &str = "OCRX_BIND";
/// Environment variable overriding the engine concurrency cap.
pub const ENV_MAX_CONCURRENT: &str = "OCRX_MAX_CONCURRENT";
/// Cloud service-account credential file.
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Path or name of the tesseract binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Language used when a request has no hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_segmentation: Option<u8>,
    /// Budget for one engine call, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Pipeline section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// End-to-end budget per request, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow: Option<OverflowPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_bytes: Option<usize>,
    /// Largest decoded width or height accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_side: Option<u32>,
    /// Parent directory for per-request scratch files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server listen address, e.g. `0.0.0.0:8000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// Default extraction options; request parameters override them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<ExtractOptions>,
    /// Path to the cloud service-account credential file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Where this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults when nothing is found or the file is unusable.
    pub async fn load() -> Self {
        match prefer::load("ocrx").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config file: {}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Format is chosen by extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_error = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        match ext {
            "toml" => toml::from_str(contents).map_err(|e| parse_error("TOML", e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).map_err(|e| parse_error("YAML", e.to_string()))
            }
            _ => serde_json::from_str(contents).map_err(|e| parse_error("JSON", e.to_string())),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }

        let engine = &mut settings.pipeline.engine;
        if let Some(ref binary) = self.engine.binary {
            // Bare names are looked up on PATH, not next to the config file.
            engine.binary = if binary.contains('/') || binary.starts_with('~') {
                self.resolve_path(binary, base_dir)
            } else {
                PathBuf::from(binary)
            };
        }
        if let Some(ref language) = self.engine.language {
            engine.default_language = language.clone();
        }
        if let Some(psm) = self.engine.page_segmentation {
            engine.page_segmentation = psm;
        }
        if let Some(secs) = self.engine.timeout_secs {
            engine.timeout = Duration::from_secs(secs);
        }

        let pipeline = &mut settings.pipeline;
        if let Some(secs) = self.pipeline.request_timeout_secs {
            pipeline.request_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = self.pipeline.max_concurrent {
            pipeline.max_concurrent = max;
        }
        if let Some(policy) = self.pipeline.overflow {
            pipeline.overflow = policy;
        }
        if let Some(bytes) = self.pipeline.max_input_bytes {
            pipeline.limits.max_input_bytes = bytes;
        }
        if let Some(side) = self.pipeline.max_side {
            pipeline.limits.max_side = side;
        }
        if let Some(ref dir) = self.pipeline.scratch_dir {
            pipeline.scratch_root = Some(self.resolve_path(dir, base_dir));
        }

        if let Some(ref defaults) = self.defaults {
            settings.defaults = defaults.clone();
        }
        if let Some(ref credentials) = self.credentials {
            settings.credentials = Some(self.resolve_path(credentials, base_dir));
        }
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Server listen address.
    pub bind: String,
    pub pipeline: PipelineConfig,
    /// Options used when a request does not specify its own.
    pub defaults: ExtractOptions,
    /// Cloud credential file, if configured.
    pub credentials: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            pipeline: PipelineConfig::default(),
            defaults: ExtractOptions::default(),
            credentials: None,
        }
    }
}

impl Settings {
    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(binary) = var(ENV_TESSERACT) {
            tracing::debug!("Using {} from environment: {}", ENV_TESSERACT, binary);
            self.pipeline.engine.binary = PathBuf::from(shellexpand::tilde(&binary).as_ref());
        }
        if let Some(bind) = var(ENV_BIND) {
            tracing::debug!("Using {} from environment: {}", ENV_BIND, bind);
            self.bind = bind;
        }
        if let Some(max) = var(ENV_MAX_CONCURRENT) {
            self.pipeline.max_concurrent = max.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{} must be a positive integer, got {:?}",
                    ENV_MAX_CONCURRENT, max
                ))
            })?;
        }
        if let Some(credentials) = var(ENV_CREDENTIALS) {
            self.credentials = Some(PathBuf::from(shellexpand::tilde(&credentials).as_ref()));
        }

        Ok(())
    }

    /// Parse the configured bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_bind_address(&self.bind)
    }
}

/// Parse a bind address that can be:
/// - Just a port: "8000" -> 0.0.0.0:8000
/// - Just a host: "127.0.0.1" -> 127.0.0.1:8000
/// - Host and port: "127.0.0.1:9000"
pub fn parse_bind_address(bind: &str) -> Result<SocketAddr, ConfigError> {
    let bind = bind.trim();
    let invalid = || ConfigError::Invalid(format!("invalid bind address: {:?}", bind));

    if let Ok(port) = bind.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    if let Ok(addr) = bind.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            let host = if host == "localhost" { "127.0.0.1" } else { host };
            return format!("{}:{}", host, port).parse().map_err(|_| invalid());
        }
    }

    let host = if bind == "localhost" { "127.0.0.1" } else { bind };
    format!("{}:{}", host, DEFAULT_PORT)
        .parse()
        .map_err(|_| invalid())
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    if let Some(ref path) = config.source_path {
        tracing::debug!("Loaded config from {}", path.display());
    }

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides(|name| std::env::var(name).ok())?;

    Ok((settings, config))
}

/// State of the cloud credential file.
///
/// The extraction path never reads the credential; this is reported for
/// operators only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    NotConfigured,
    Missing(PathBuf),
    Unreadable { path: PathBuf, reason: String },
    Present(PathBuf),
}

impl CredentialStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, CredentialStatus::Present(_))
    }
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialStatus::NotConfigured => write!(f, "not configured"),
            CredentialStatus::Missing(path) => write!(f, "missing ({})", path.display()),
            CredentialStatus::Unreadable { path, reason } => {
                write!(f, "unreadable ({}): {}", path.display(), reason)
            }
            CredentialStatus::Present(path) => write!(f, "present ({})", path.display()),
        }
    }
}

/// Inspect the credential file without failing on any outcome.
pub fn inspect_credentials(path: Option<&Path>) -> CredentialStatus {
    let Some(path) = path else {
        return CredentialStatus::NotConfigured;
    };
    if !path.exists() {
        return CredentialStatus::Missing(path.to_path_buf());
    }

    let unreadable = |reason: String| CredentialStatus::Unreadable {
        path: path.to_path_buf(),
        reason,
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<serde_json::Value>(&contents) {
            Ok(value) if value.is_object() => CredentialStatus::Present(path.to_path_buf()),
            Ok(_) => unreadable("not a JSON object".to_string()),
            Err(e) => unreadable(e.to_string()),
        },
        Err(e) => unreadable(e.to_string()),
    }
}
