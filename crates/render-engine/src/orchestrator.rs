//! End-to-end render: reset, stage, run, stream, locate.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scenecast_common::config::AppConfig;
use scenecast_common::error::{SceneError, SceneResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::hub::BroadcastHub;
use crate::locator::{Artifact, ArtifactKind, ArtifactLocator, ExtensionLocator};
use crate::request::RenderRequest;
use crate::runner::ProcessRunner;
use crate::workspace::{DiskWorkspace, RenderWorkspace};

/// What one engine run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub exit_code: i32,
    /// Set only after a clean exit that left media behind.
    pub artifact: Option<Artifact>,
    pub elapsed: Duration,
}

impl RenderResult {
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(|a| a.path.as_path())
    }

    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        self.artifact.as_ref().map(|a| a.kind)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.artifact.is_some()
    }

    /// The artifact, or the reason there is none.
    pub fn into_artifact(self) -> SceneResult<Artifact> {
        if self.exit_code != 0 {
            return Err(SceneError::EngineFailure {
                exit_code: self.exit_code,
            });
        }
        self.artifact.ok_or(SceneError::NoArtifactProduced)
    }
}

/// Terminal report for a client, serialized as
/// `{"status": "success", "file_url": ..., "kind": ...}` or
/// `{"status": "failure", "reason": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RenderOutcome {
    Success { file_url: String, kind: ArtifactKind },
    Failure { reason: String },
}

impl RenderOutcome {
    /// Build the report for a finished `render` call. `web_root` is the
    /// directory artifact URLs are relative to.
    pub fn from_render(result: SceneResult<RenderResult>, web_root: &Path) -> Self {
        match result.and_then(RenderResult::into_artifact) {
            Ok(artifact) => match artifact.web_path(web_root) {
                Some(file_url) => RenderOutcome::Success {
                    file_url,
                    kind: artifact.kind,
                },
                None => RenderOutcome::Failure {
                    reason: "rendered media is outside the served directory".to_string(),
                },
            },
            Err(e) => RenderOutcome::from_error(&e),
        }
    }

    pub fn from_error(error: &SceneError) -> Self {
        let reason = match error {
            SceneError::EngineFailure { exit_code } => {
                format!("engine failed to render (exit code {exit_code})")
            }
            SceneError::NoArtifactProduced => "render finished but no media found".to_string(),
            other => other.to_string(),
        };
        RenderOutcome::Failure { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RenderOutcome::Success { .. })
    }
}

/// Runs renders one at a time, streaming engine output to a [`BroadcastHub`].
pub struct RenderOrchestrator {
    runner: ProcessRunner,
    workspace: Arc<dyn RenderWorkspace>,
    locator: Arc<dyn ArtifactLocator>,
    hub: BroadcastHub,
    render_lock: Mutex<()>,
}

impl RenderOrchestrator {
    /// The runner's working directory is set to the workspace's.
    pub fn new(
        runner: ProcessRunner,
        workspace: Arc<dyn RenderWorkspace>,
        hub: BroadcastHub,
    ) -> Self {
        let runner = runner.with_current_dir(workspace.working_dir());
        if !runner.is_available() {
            tracing::warn!(
                program = runner.program(),
                "Rendering engine not found; renders will fail to start"
            );
        }
        Self {
            runner,
            workspace,
            locator: Arc::new(ExtensionLocator::default()),
            hub,
            render_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ProcessRunner::from_config(&config.engine),
            Arc::new(DiskWorkspace::from_config(&config.workspace)),
            BroadcastHub::with_capacity(config.observers.channel_capacity),
        )
    }

    pub fn with_locator(mut self, locator: Arc<dyn ArtifactLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn workspace(&self) -> &dyn RenderWorkspace {
        self.workspace.as_ref()
    }

    /// Render one script.
    ///
    /// Concurrent calls on the same orchestrator wait for each other; the
    /// workspace is wiped at the start of every render.
    ///
    /// Errors are reserved for renders that never got an exit code (bad
    /// request, workspace I/O, spawn failure, watchdog). A nonzero exit or a
    /// clean exit without media is reported through the returned
    /// [`RenderResult`]; see [`RenderResult::into_artifact`].
    pub async fn render(&self, request: RenderRequest) -> SceneResult<RenderResult> {
        let _guard = self.render_lock.lock().await;
        let started = Instant::now();
        let file_name = request.script.staged_name()?.to_string();

        tracing::info!(
            script = %file_name,
            quality = %request.quality,
            transparent = request.transparent,
            vertical = request.vertical,
            "Starting render"
        );

        let workspace = Arc::clone(&self.workspace);
        let script = request.script.clone();
        let script_path = blocking(move || {
            workspace.reset()?;
            workspace.stage_script(&script)
        })
        .await?;

        self.hub.broadcast(&format!("Starting render of: {file_name}"));

        let spec = request.command_spec(&script_path);
        let hub = &self.hub;
        let exit_code = self
            .runner
            .run(&spec, |chunk| {
                hub.broadcast(&chunk.text);
            })
            .await?;

        if exit_code != 0 {
            tracing::warn!(exit_code, script = %file_name, "Engine failed to render");
            return Ok(RenderResult {
                exit_code,
                artifact: None,
                elapsed: started.elapsed(),
            });
        }

        let locator = Arc::clone(&self.locator);
        let media_root = self.workspace.media_root().to_path_buf();
        let artifact = blocking(move || locator.locate(&media_root)).await?;

        match &artifact {
            Some(found) => tracing::info!(
                artifact = %found.path.display(),
                kind = %found.kind,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Render finished"
            ),
            None => tracing::warn!(script = %file_name, "Render finished but no media found"),
        }

        Ok(RenderResult {
            exit_code,
            artifact,
            elapsed: started.elapsed(),
        })
    }
}

async fn blocking<T, F>(f: F) -> SceneResult<T>
where
    F: FnOnce() -> SceneResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SceneError::Other(anyhow::Error::new(e)))?
}
