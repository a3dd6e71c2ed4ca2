//! Error types shared across Scenecast crates.

/// Top-level error type for Scenecast operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// The rendering engine could not be started at all.
    #[error("Failed to start rendering engine `{program}`: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran and exited with a nonzero status.
    #[error("Rendering engine failed (exit code {exit_code})")]
    EngineFailure { exit_code: i32 },

    /// The engine exited cleanly but left no media behind.
    #[error("Render finished but no media was produced")]
    NoArtifactProduced,

    #[error("Rendering engine exceeded the maximum runtime of {secs}s")]
    Timeout { secs: u64 },

    #[error("Invalid render request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Workspace error: {message}")]
    Workspace { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SceneError.
pub type SceneResult<T> = Result<T, SceneError>;

impl SceneError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailure {
            program: program.into(),
            source,
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace {
            message: msg.into(),
        }
    }

    /// Whether the engine was actually started before this error occurred.
    pub fn engine_ran(&self) -> bool {
        matches!(
            self,
            Self::EngineFailure { .. } | Self::NoArtifactProduced | Self::Timeout { .. }
        )
    }
}
