//! Scenecast Render Engine
//!
//! Runs an external animation engine on a submitted script, streams its
//! console output to connected observers while it works, and reports the
//! media file it produced.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ScriptUpload ──► Workspace reset + stage
//!                          │
//!                          ▼
//!                  Engine process (stdout, stderr)
//!                          │ 8 KiB chunks
//!                          ▼
//!                      Sanitize ──► BroadcastHub ──► observers
//!                          │
//!                          ▼ exit code 0
//!                  Locate newest media
//!                          │
//!                          ▼
//!                   RenderResult / RenderOutcome
//! ```

pub mod hub;
pub mod locator;
pub mod orchestrator;
pub mod request;
pub mod runner;
pub mod sanitize;
pub mod workspace;

pub use hub::{BroadcastHub, BroadcastResult, LogObserver, ObserverId};
pub use locator::{Artifact, ArtifactKind, ArtifactLocator, ExtensionLocator};
pub use orchestrator::{RenderOrchestrator, RenderOutcome, RenderResult};
pub use request::{CommandSpec, Quality, RenderRequest, ScriptUpload};
pub use runner::{OutputChunk, OutputStream, ProcessRunner};
pub use sanitize::{sanitize, ChunkDecoder};
pub use workspace::{DiskWorkspace, RenderWorkspace};
