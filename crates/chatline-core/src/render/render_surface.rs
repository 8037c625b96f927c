use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::frame::RenderFrame;
use crate::models::{RenderVersion, RenderVersionController};

/// What the user currently sees, plus counters for applied and stale completions.
#[derive(Debug, Default)]
pub struct VisibleState {
    pub frame: Option<Arc<RenderFrame>>,
    pub applied: u64,
    pub discarded: u64,
}

/// Receives frames and paints them asynchronously.
///
/// Implementations must call [`RenderCompletion::complete`] once painting is
/// done, from any thread and in any order relative to other completions.
pub trait RenderSurface: Send + Sync + 'static {
    fn render_async(&self, frame: Arc<RenderFrame>, completion: RenderCompletion);
}

/// Token that commits a frame when its paint finishes.
///
/// Carries the version captured when the render was scheduled; a completion
/// whose version is no longer current is dropped instead of applied.
#[must_use = "a render completion must be completed for its frame to become visible"]
pub struct RenderCompletion {
    version: RenderVersion,
    versions: RenderVersionController,
    frame: Arc<RenderFrame>,
    visible: Arc<Mutex<VisibleState>>,
}

impl RenderCompletion {
    pub(crate) fn new(
        version: RenderVersion,
        versions: RenderVersionController,
        frame: Arc<RenderFrame>,
        visible: Arc<Mutex<VisibleState>>,
    ) -> Self {
        Self {
            version,
            versions,
            frame,
            visible,
        }
    }

    pub fn version(&self) -> RenderVersion {
        self.version
    }

    /// Apply the frame if its version is still current. Returns whether it was applied.
    pub fn complete(self) -> bool {
        let mut visible = self.visible.lock();
        // Checked under the visible lock so two completions cannot both pass
        // the check and then commit out of order.
        if self.versions.is_current(self.version) {
            visible.frame = Some(self.frame);
            visible.applied += 1;
            true
        } else {
            debug!(
                stale = %self.version,
                current = %self.versions.current(),
                "Discarding stale render completion"
            );
            visible.discarded += 1;
            false
        }
    }
}
