//! Render requests and the engine command line derived from them.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use scenecast_common::error::{SceneError, SceneResult};
use serde::{Deserialize, Serialize};

/// Engine quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// 854x480 landscape.
    Draft,
    /// 1280x720 landscape.
    #[default]
    Medium,
    /// 1920x1080 landscape.
    High,
    /// 3840x2160 landscape.
    Ultra,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Draft, Quality::Medium, Quality::High, Quality::Ultra];

    /// Command-line flag understood by the engine.
    pub fn flag(self) -> &'static str {
        match self {
            Quality::Draft => "-ql",
            Quality::Medium => "-qm",
            Quality::High => "-qh",
            Quality::Ultra => "-qk",
        }
    }

    /// Portrait `(width, height)`: the landscape preset with its axes swapped.
    pub fn vertical_resolution(self) -> (u32, u32) {
        match self {
            Quality::Draft => (480, 854),
            Quality::Medium => (720, 1280),
            Quality::High => (1080, 1920),
            Quality::Ultra => (2160, 3840),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Draft => "draft",
            Quality::Medium => "medium",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = SceneError;

    /// Accepts a preset name (`medium`) or an engine flag (`-qm`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Quality::ALL
            .into_iter()
            .find(|q| wanted.eq_ignore_ascii_case(q.as_str()) || wanted == q.flag())
            .ok_or_else(|| {
                SceneError::invalid_request(format!(
                    "unknown quality {wanted:?}; use draft, medium, high or ultra"
                ))
            })
    }
}

/// A script as submitted by the user: its file name and raw contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUpload {
    pub file_name: String,
    pub contents: Vec<u8>,
}

impl ScriptUpload {
    pub fn new(file_name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
        }
    }

    /// Read a script from disk, keeping its file name.
    pub fn from_path(path: &Path) -> SceneResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                SceneError::invalid_request(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let contents = std::fs::read(path)?;
        Ok(Self {
            file_name,
            contents,
        })
    }

    /// Final path component of the submitted name, with either separator
    /// style stripped. Rejects names that do not name a file.
    pub fn staged_name(&self) -> SceneResult<&str> {
        let name = self
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() || name == "." || name == ".." {
            return Err(SceneError::invalid_request(format!(
                "script name {:?} is not a file name",
                self.file_name
            )));
        }
        Ok(name)
    }
}

/// Everything needed for one render. Consumed by the orchestrator.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub script: ScriptUpload,
    pub quality: Quality,
    /// Render with a transparent background.
    pub transparent: bool,
    /// Render in portrait orientation.
    pub vertical: bool,
}

impl RenderRequest {
    pub fn new(script: ScriptUpload) -> Self {
        Self {
            script,
            quality: Quality::default(),
            transparent: false,
            vertical: false,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn vertical(mut self, vertical: bool) -> Self {
        self.vertical = vertical;
        self
    }

    /// Engine arguments for this request, with the staged script last.
    pub fn command_spec(&self, script_path: &Path) -> CommandSpec {
        let mut args = vec![self.quality.flag().to_string()];
        if self.transparent {
            args.push("-t".to_string());
        }
        if self.vertical {
            let (width, height) = self.quality.vertical_resolution();
            args.push("--resolution".to_string());
            args.push(format!("{width},{height}"));
        }
        args.push(script_path.display().to_string());
        CommandSpec { args }
    }
}

/// Ordered engine arguments. The program itself is owned by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The script argument, which always comes last.
    pub fn script(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RenderRequest {
        RenderRequest::new(ScriptUpload::new("scene.py", "from manim import *"))
    }

    #[test]
    fn test_quality_parses_names_and_flags() {
        assert_eq!("draft".parse::<Quality>().unwrap(), Quality::Draft);
        assert_eq!("ULTRA".parse::<Quality>().unwrap(), Quality::Ultra);
        assert_eq!("-qh".parse::<Quality>().unwrap(), Quality::High);
        assert!("-qx".parse::<Quality>().is_err());
    }

    #[test]
    fn test_quality_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Quality::High).unwrap(), "\"high\"");
        let q: Quality = serde_json::from_str("\"draft\"").unwrap();
        assert_eq!(q, Quality::Draft);
    }

    #[test]
    fn test_basic_command_line() {
        let spec = request().command_spec(Path::new("uploads/scene.py"));
        assert_eq!(spec.args(), ["-qm", "uploads/scene.py"]);
        assert_eq!(spec.to_string(), "-qm uploads/scene.py");
    }

    #[test]
    fn test_transparent_flag_follows_quality() {
        let spec = request()
            .with_quality(Quality::Draft)
            .transparent(true)
            .command_spec(Path::new("s.py"));
        assert_eq!(spec.args(), ["-ql", "-t", "s.py"]);
    }

    #[test]
    fn test_vertical_medium_overrides_resolution() {
        let spec = request().vertical(true).command_spec(Path::new("s.py"));
        assert_eq!(spec.args(), ["-qm", "--resolution", "720,1280", "s.py"]);
    }

    #[test]
    fn test_vertical_resolution_table() {
        let expected = ["480,854", "720,1280", "1080,1920", "2160,3840"];
        for (quality, res) in Quality::ALL.into_iter().zip(expected) {
            let spec = request()
                .with_quality(quality)
                .vertical(true)
                .transparent(true)
                .command_spec(Path::new("s.py"));
            assert_eq!(
                spec.args(),
                [quality.flag(), "-t", "--resolution", res, "s.py"]
            );
        }
    }

    #[test]
    fn test_script_path_is_last() {
        let spec = request()
            .vertical(true)
            .transparent(true)
            .command_spec(Path::new("/work/uploads/scene.py"));
        assert_eq!(spec.script(), Some("/work/uploads/scene.py"));
    }

    #[test]
    fn test_staged_name_strips_directories() {
        let upload = ScriptUpload::new("..\\..\\evil/scene.py", "");
        assert_eq!(upload.staged_name().unwrap(), "scene.py");
        assert_eq!(
            ScriptUpload::new("C:\\Users\\me\\a.py", "").staged_name().unwrap(),
            "a.py"
        );
    }

    #[test]
    fn test_staged_name_rejects_non_files() {
        for name in ["", "dir/", "..", "a/.."] {
            assert!(ScriptUpload::new(name, "").staged_name().is_err(), "{name:?}");
        }
    }
}
