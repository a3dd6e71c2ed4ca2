//! Directory state owned by the render in progress.

use std::path::{Path, PathBuf};

use scenecast_common::config::WorkspaceConfig;
use scenecast_common::error::{SceneError, SceneResult};

use crate::request::ScriptUpload;

/// Where a render stages its script and where the engine writes media.
///
/// Implementations are driven from a blocking context; the orchestrator
/// calls them through `spawn_blocking`.
pub trait RenderWorkspace: Send + Sync {
    /// Discard everything left by a previous render and recreate the
    /// staging and output directories empty.
    fn reset(&self) -> SceneResult<()>;

    /// Persist the submitted script. Returns the path the engine should read.
    fn stage_script(&self, script: &ScriptUpload) -> SceneResult<PathBuf>;

    /// Working directory for the engine process.
    fn working_dir(&self) -> &Path;

    /// Root of the tree the engine writes media into.
    fn media_root(&self) -> &Path;
}

/// On-disk workspace: `<root>/uploads` for scripts, `<root>/media` for output.
#[derive(Debug, Clone)]
pub struct DiskWorkspace {
    root: PathBuf,
    upload_dir: PathBuf,
    media_dir: PathBuf,
}

impl DiskWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(&WorkspaceConfig { root: root.into() })
    }

    /// A relative root is resolved against the current directory, since the
    /// engine runs inside the root and receives the staged script's path.
    pub fn from_config(config: &WorkspaceConfig) -> Self {
        let config = if config.root.is_absolute() {
            config.clone()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => WorkspaceConfig {
                    root: cwd.join(&config.root),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot resolve workspace root, using it as given");
                    config.clone()
                }
            }
        };
        Self {
            root: config.root.clone(),
            upload_dir: config.upload_dir(),
            media_dir: config.media_dir(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}

impl RenderWorkspace for DiskWorkspace {
    fn reset(&self) -> SceneResult<()> {
        for dir in [&self.upload_dir, &self.media_dir] {
            if dir.exists() {
                std::fs::remove_dir_all(dir).map_err(|e| {
                    SceneError::workspace(format!("cannot clear {}: {e}", dir.display()))
                })?;
            }
            std::fs::create_dir_all(dir).map_err(|e| {
                SceneError::workspace(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        tracing::debug!(root = %self.root.display(), "Workspace reset");
        Ok(())
    }

    fn stage_script(&self, script: &ScriptUpload) -> SceneResult<PathBuf> {
        let path = self.upload_dir.join(script.staged_name()?);
        std::fs::write(&path, &script.contents).map_err(|e| {
            SceneError::workspace(format!("cannot write {}: {e}", path.display()))
        })?;
        tracing::debug!(
            path = %path.display(),
            bytes = script.contents.len(),
            "Script staged"
        );
        Ok(path)
    }

    fn working_dir(&self) -> &Path {
        &self.root
    }

    fn media_root(&self) -> &Path {
        &self.media_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_discards_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let ws = DiskWorkspace::new(dir.path());
        let stale = ws.media_root().join("videos/old/Scene.mp4");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"old").unwrap();
        std::fs::create_dir_all(ws.upload_dir()).unwrap();
        std::fs::write(ws.upload_dir().join("old.py"), b"old").unwrap();

        ws.reset().unwrap();

        assert!(ws.media_root().is_dir());
        assert!(ws.upload_dir().is_dir());
        assert!(!stale.exists());
        assert_eq!(std::fs::read_dir(ws.upload_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_reset_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ws = DiskWorkspace::new(dir.path().join("fresh"));
        ws.reset().unwrap();
        assert!(ws.media_root().is_dir());
        assert!(ws.upload_dir().is_dir());
    }

    #[test]
    fn test_stage_script_keeps_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let ws = DiskWorkspace::new(dir.path());
        ws.reset().unwrap();

        let script = ScriptUpload::new("nested/dirs/scene.py", "class A(Scene): pass");
        let path = ws.stage_script(&script).unwrap();
        assert_eq!(path, ws.upload_dir().join("scene.py"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "class A(Scene): pass"
        );
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let ws = DiskWorkspace::new("render-work");
        assert!(ws.working_dir().is_absolute());
        assert!(ws.media_root().ends_with("render-work/media"));
    }

    #[test]
    fn test_stage_script_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let ws = DiskWorkspace::new(dir.path());
        ws.reset().unwrap();
        let err = ws.stage_script(&ScriptUpload::new("..", "x")).unwrap_err();
        assert!(matches!(err, SceneError::InvalidRequest { .. }));
    }
}
