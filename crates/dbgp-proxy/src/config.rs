//! Proxy configuration and tracing bootstrap.
//!
//! Configuration is a TOML file; every section is optional and falls back to
//! in-memory defaults, so a bare `dbgp-proxy` still serves the standard DBGp
//! proxy ports with translation effectively disabled until real roots are
//! configured.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;

use crate::translate::TranslatorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("listen address for the {0} listener is empty")]
    EmptyListenAddr(&'static str),
    #[error("paths.{which} must be absolute, got {path}")]
    RelativeRoot { which: &'static str, path: PathBuf },
    #[error("invalid translate_only pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("prereg entry {index} has an empty key")]
    EmptyPreregKey { index: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// IDE endpoints registered before the listeners accept anything, for
    /// setups where the IDE cannot (or should not) register itself.
    #[serde(default)]
    pub prereg: Vec<PreregisteredIde>,
}

impl ProxyConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ProxyConfig = toml::from_str(&text)?;
        Ok(config)
    }

    /// Structural checks that deserialization alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.registration.trim().is_empty() {
            return Err(ConfigError::EmptyListenAddr("registration"));
        }
        if self.listen.debug.trim().is_empty() {
            return Err(ConfigError::EmptyListenAddr("debug"));
        }
        self.paths.require_absolute_roots()?;
        self.paths.translate_only_globs()?;
        for (index, entry) in self.prereg.iter().enumerate() {
            if entry.key.is_empty() {
                return Err(ConfigError::EmptyPreregKey { index });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListenConfig {
    /// Address of the IDE registration listener.
    #[serde(default = "ListenConfig::default_registration")]
    pub registration: String,
    /// Address of the engine (DBGp) listener.
    #[serde(default = "ListenConfig::default_debug")]
    pub debug: String,
}

impl ListenConfig {
    fn default_registration() -> String {
        "0.0.0.0:9001".to_string()
    }

    fn default_debug() -> String {
        "0.0.0.0:9002".to_string()
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            registration: Self::default_registration(),
            debug: Self::default_debug(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PathsConfig {
    /// Base directory of the content-hashed cache tree. The rewriter appends
    /// its generation components to this verbatim, so a trailing separator
    /// here is significant.
    #[serde(default = "PathsConfig::default_cache_root")]
    pub cache_root: PathBuf,
    /// Root of the original project tree as the IDE sees it.
    #[serde(default = "PathsConfig::default_project_root")]
    pub project_root: PathBuf,
    /// Checkout used for existence and hash checks when the proxy host's copy
    /// of the tree lives elsewhere than `project_root`.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    /// Relative paths never translated toward the cache.
    #[serde(default)]
    pub do_not_translate: Vec<String>,
    /// Glob patterns (matched against the url path) gating which engine-side
    /// filenames are attempted; empty means attempt everything.
    #[serde(default)]
    pub translate_only: Vec<String>,
    /// Cache generation components, appended to `cache_root` with no
    /// separators, mirroring how the rewriter names its cache directory.
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub rewriter_version: Option<String>,
    #[serde(default)]
    pub rewriter_hash: Option<String>,
}

impl PathsConfig {
    fn default_cache_root() -> PathBuf {
        PathBuf::from("/tmp/mocks/")
    }

    fn default_project_root() -> PathBuf {
        PathBuf::from("/home/developer/project")
    }

    /// The cache root actually present on disk:
    /// `cache_root . php_version . rewriter_version . rewriter_hash`.
    pub fn effective_cache_root(&self) -> PathBuf {
        let mut root = self.cache_root.as_os_str().to_os_string();
        for component in [
            &self.php_version,
            &self.rewriter_version,
            &self.rewriter_hash,
        ]
        .into_iter()
        .flatten()
        {
            root.push(component);
        }
        PathBuf::from(root)
    }

    pub fn translate_only_globs(&self) -> Result<Option<GlobSet>, ConfigError> {
        if self.translate_only.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.translate_only {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Some(builder.build()?))
    }

    pub fn translator_config(&self) -> Result<TranslatorConfig, ConfigError> {
        Ok(TranslatorConfig {
            cache_root: self.effective_cache_root(),
            project_root: self.project_root.clone(),
            local_root: self.local_root.clone(),
            do_not_translate: self
                .do_not_translate
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>(),
            translate_only: self.translate_only_globs()?,
        })
    }

    fn require_absolute_roots(&self) -> Result<(), ConfigError> {
        if !self.cache_root.is_absolute() {
            return Err(ConfigError::RelativeRoot {
                which: "cache_root",
                path: self.cache_root.clone(),
            });
        }
        if !self.project_root.is_absolute() {
            return Err(ConfigError::RelativeRoot {
                which: "project_root",
                path: self.project_root.clone(),
            });
        }
        if let Some(local_root) = &self.local_root {
            if !local_root.is_absolute() {
                return Err(ConfigError::RelativeRoot {
                    which: "local_root",
                    path: local_root.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_root: Self::default_cache_root(),
            project_root: Self::default_project_root(),
            local_root: None,
            do_not_translate: Vec::new(),
            translate_only: Vec::new(),
            php_version: None,
            rewriter_version: None,
            rewriter_hash: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LimitsConfig {
    /// Bound on an outbound IDE connection attempt, in milliseconds.
    #[serde(default = "LimitsConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on the wait for an engine's first packet, in milliseconds.
    /// `0` waits indefinitely.
    #[serde(default)]
    pub first_packet_timeout_ms: u64,
}

impl LimitsConfig {
    fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn first_packet_timeout(&self) -> Option<Duration> {
        match self.first_packet_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            first_packet_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Either a simple level (`info`, `debug`, ...) or a full
    /// `tracing_subscriber::EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Append logs to the given file path in addition to stderr. If the file
    /// cannot be opened, file logging is disabled while stderr remains.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_string(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured directives, with `RUST_LOG`
    /// merged in when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreregisteredIde {
    pub key: String,
    pub host: String,
    pub port: u16,
}

static TRACING_INIT: Once = Once::new();

/// Installs the global tracing subscriber. Only the first call takes effect.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let mut make_writer = BoxMakeWriter::new(std::io::stderr);
        let file = logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(Arc::new(file)));
        }
        tracing_subscriber::registry()
            .with(logging.env_filter())
            .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
            .init();
    });
}
