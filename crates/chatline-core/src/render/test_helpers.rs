//! Render surfaces for tests.

use std::sync::Arc;

use parking_lot::Mutex;

use super::frame::RenderFrame;
use super::render_surface::{RenderCompletion, RenderSurface};

/// Holds every completion until the test resolves them, in whatever order it chooses.
#[derive(Default)]
pub struct DeferredSurface {
    pending: Mutex<Vec<RenderCompletion>>,
    painted: Mutex<Vec<Arc<RenderFrame>>>,
}

impl DeferredSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Every frame the surface was asked to paint, in scheduling order.
    pub fn painted(&self) -> Vec<Arc<RenderFrame>> {
        self.painted.lock().clone()
    }

    /// Resolve newest first. Returns how many were applied.
    pub fn resolve_reverse(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain(..).collect();
        drained
            .into_iter()
            .rev()
            .map(RenderCompletion::complete)
            .filter(|applied| *applied)
            .count()
    }

    pub fn resolve_in_order(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain(..).collect();
        drained
            .into_iter()
            .map(RenderCompletion::complete)
            .filter(|applied| *applied)
            .count()
    }
}

impl RenderSurface for DeferredSurface {
    fn render_async(&self, frame: Arc<RenderFrame>, completion: RenderCompletion) {
        self.painted.lock().push(frame);
        self.pending.lock().push(completion);
    }
}

/// Completes every render before returning.
#[derive(Default)]
pub struct ImmediateSurface {
    painted: Mutex<Vec<Arc<RenderFrame>>>,
}

impl ImmediateSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn painted(&self) -> Vec<Arc<RenderFrame>> {
        self.painted.lock().clone()
    }
}

impl RenderSurface for ImmediateSurface {
    fn render_async(&self, frame: Arc<RenderFrame>, completion: RenderCompletion) {
        self.painted.lock().push(frame);
        let _ = completion.complete();
    }
}
