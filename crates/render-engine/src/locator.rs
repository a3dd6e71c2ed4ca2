//! Discovery of the media file an engine run produced.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use scenecast_common::error::SceneResult;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Kind of rendered media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Image,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Video => f.write_str("video"),
            ArtifactKind::Image => f.write_str("image"),
        }
    }
}

/// A media file found under the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub modified: SystemTime,
}

impl Artifact {
    /// URL-style path relative to `root`: forward slashes, leading `/`.
    ///
    /// `None` when the artifact does not live under `root`.
    pub fn web_path(&self, root: &Path) -> Option<String> {
        let relative = self.path.strip_prefix(root).ok()?;
        let mut web = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    web.push('/');
                    web.push_str(&part.to_string_lossy());
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        if web.is_empty() {
            None
        } else {
            Some(web)
        }
    }
}

/// Finds the artifact of a finished run.
///
/// Symlinked files count as the file they point to; the link's own path is
/// what gets reported.
pub trait ArtifactLocator: Send + Sync {
    /// Search `root`. `Ok(None)` means nothing was produced.
    fn locate(&self, root: &Path) -> SceneResult<Option<Artifact>>;
}

/// Picks the newest file by extension, preferring video over image.
#[derive(Debug, Clone)]
pub struct ExtensionLocator {
    video_extension: String,
    image_extension: String,
}

impl Default for ExtensionLocator {
    fn default() -> Self {
        Self {
            video_extension: "mp4".to_string(),
            image_extension: "png".to_string(),
        }
    }
}

impl ExtensionLocator {
    fn classify(&self, path: &Path) -> Option<ArtifactKind> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case(&self.video_extension) {
            Some(ArtifactKind::Video)
        } else if ext.eq_ignore_ascii_case(&self.image_extension) {
            Some(ArtifactKind::Image)
        } else {
            None
        }
    }
}

impl ArtifactLocator for ExtensionLocator {
    fn locate(&self, root: &Path) -> SceneResult<Option<Artifact>> {
        if !root.exists() {
            tracing::debug!(root = %root.display(), "Output root missing, no artifact");
            return Ok(None);
        }

        let mut latest_video: Option<Artifact> = None;
        let mut latest_image: Option<Artifact> = None;
        let mut scanned = 0usize;

        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable output entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            scanned += 1;

            let Some(kind) = self.classify(entry.path()) else {
                continue;
            };
            let modified = match entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|meta| meta.modified())
            {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Skipping file without mtime"
                    );
                    continue;
                }
            };

            let candidate = Artifact {
                path: entry.into_path(),
                kind,
                modified,
            };
            let slot = match kind {
                ArtifactKind::Video => &mut latest_video,
                ArtifactKind::Image => &mut latest_image,
            };
            if is_newer(&candidate, slot.as_ref()) {
                *slot = Some(candidate);
            }
        }

        let found = latest_video.or(latest_image);
        tracing::debug!(
            root = %root.display(),
            scanned,
            artifact = ?found.as_ref().map(|a| a.path.display().to_string()),
            "Artifact search finished"
        );
        Ok(found)
    }
}

/// Newer mtime wins; equal mtimes fall back to the greater path so the
/// choice does not depend on traversal order.
fn is_newer(candidate: &Artifact, current: Option<&Artifact>) -> bool {
    match current {
        None => true,
        Some(current) => {
            (candidate.modified, &candidate.path) > (current.modified, &current.path)
        }
    }
}

/// Search `root` with the default `.mp4` / `.png` rules.
pub fn locate(root: &Path) -> SceneResult<Option<Artifact>> {
    ExtensionLocator::default().locate(root)
}
