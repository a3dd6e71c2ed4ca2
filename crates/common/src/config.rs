//! Application configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SceneError, SceneResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// External rendering engine settings.
    pub engine: EngineConfig,

    /// Staging and output directories.
    pub workspace: WorkspaceConfig,

    /// Log observer settings.
    pub observers: ObserverConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// How the rendering engine is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable name or path.
    pub program: String,

    /// Arguments placed before the render arguments, e.g. `["-m", "manim"]`
    /// when `program` is a Python interpreter.
    pub base_args: Vec<String>,

    /// Extra environment variables for the engine process.
    pub env: BTreeMap<String, String>,

    /// Bytes read from an output stream per chunk.
    pub chunk_size: usize,

    /// Kill the engine after this many seconds. `None` disables the watchdog.
    pub max_runtime_secs: Option<u64>,
}

/// Directory layout used by renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory. The engine runs with this as its working directory.
    pub root: PathBuf,
}

/// Log observer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Messages buffered per observer before deliveries start being skipped.
    pub channel_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "scenecast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        Self {
            program: "manim".to_string(),
            base_args: Vec::new(),
            env,
            chunk_size: 8192,
            max_runtime_secs: None,
        }
    }
}

impl EngineConfig {
    /// Watchdog duration, if one is configured.
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

impl WorkspaceConfig {
    /// Directory holding the submitted script.
    pub fn upload_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Directory the engine writes its media into.
    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let (config, error) = Self::load_or_default();
        if let Some(e) = error {
            tracing::warn!("Failed to load config at {:?}: {}", config_file_path(), e);
        }
        config
    }

    /// Like [`load`](Self::load), but hands the load error back instead of
    /// logging it, for callers that install logging from the config itself.
    pub fn load_or_default() -> (Self, Option<SceneError>) {
        Self::load_or_default_at(&config_file_path())
    }

    fn load_or_default_at(path: &Path) -> (Self, Option<SceneError>) {
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::load_from(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Load config from an explicit path. Errors are not swallowed.
    pub fn load_from(path: &Path) -> SceneResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SceneError::config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> SceneResult<()> {
        if self.engine.program.trim().is_empty() {
            return Err(SceneError::config("engine.program must not be empty"));
        }
        if self.engine.chunk_size == 0 {
            return Err(SceneError::config("engine.chunk_size must be positive"));
        }
        if self.observers.channel_capacity == 0 {
            return Err(SceneError::config(
                "observers.channel_capacity must be positive",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("scenecast").join("config.json")
}
