use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::frame::RenderFrame;
use super::render_surface::{RenderCompletion, RenderSurface, VisibleState};
use crate::models::{RenderVersion, RenderVersionController};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub scheduled: u64,
    pub applied: u64,
    pub discarded: u64,
}

/// Schedules fire-and-forget renders and tracks which one is visible.
pub struct RenderPipeline {
    surface: Arc<dyn RenderSurface>,
    versions: RenderVersionController,
    visible: Arc<Mutex<VisibleState>>,
    scheduled: u64,
}

impl RenderPipeline {
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            surface,
            versions: RenderVersionController::new(),
            visible: Arc::new(Mutex::new(VisibleState::default())),
            scheduled: 0,
        }
    }

    pub fn versions(&self) -> &RenderVersionController {
        &self.versions
    }

    /// Bump the version, build a frame stamped with it and hand it to the surface.
    /// Never waits for the paint.
    pub fn schedule(&mut self, build: impl FnOnce(RenderVersion) -> RenderFrame) -> RenderVersion {
        let version = self.versions.bump();
        let frame = Arc::new(build(version));
        let completion = RenderCompletion::new(
            version,
            self.versions.clone(),
            frame.clone(),
            self.visible.clone(),
        );
        self.scheduled += 1;
        trace!(version = %version, entries = frame.entries.len(), "Render scheduled");
        self.surface.render_async(frame, completion);
        version
    }

    /// Start a new version epoch. Completions issued before this call are stale.
    pub fn reset(&self) -> RenderVersion {
        self.versions.reset()
    }

    /// Most recently applied frame.
    pub fn visible_frame(&self) -> Option<Arc<RenderFrame>> {
        self.visible.lock().frame.clone()
    }

    pub fn stats(&self) -> RenderStats {
        let visible = self.visible.lock();
        RenderStats {
            scheduled: self.scheduled,
            applied: visible.applied,
            discarded: visible.discarded,
        }
    }
}
