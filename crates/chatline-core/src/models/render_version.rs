use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

const SEQ_BITS: u32 = 32;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

/// Sequence value a fresh conversation starts from.
pub const INITIAL_RENDER_SEQ: u32 = 0;

/// Stamp captured when a render is scheduled.
///
/// `seq` restarts at [`INITIAL_RENDER_SEQ`] whenever a different conversation
/// becomes active; `epoch` advances at that moment so stamps issued for the
/// previous conversation never compare equal to new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderVersion {
    epoch: u32,
    seq: u32,
}

impl RenderVersion {
    fn pack(self) -> u64 {
        (u64::from(self.epoch) << SEQ_BITS) | u64::from(self.seq)
    }

    fn unpack(raw: u64) -> Self {
        Self {
            epoch: (raw >> SEQ_BITS) as u32,
            seq: (raw & SEQ_MASK) as u32,
        }
    }

    fn next(self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { seq, ..self },
            None => Self {
                epoch: self.epoch.wrapping_add(1),
                seq: INITIAL_RENDER_SEQ + 1,
            },
        }
    }

    fn next_epoch(self) -> Self {
        Self {
            epoch: self.epoch.wrapping_add(1),
            seq: INITIAL_RENDER_SEQ,
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }
}

impl fmt::Display for RenderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.epoch, self.seq)
    }
}

/// Issues render stamps and answers whether a stamp is still current.
///
/// Clones share the counter, so completion handlers running on any thread
/// can validate without taking a lock.
#[derive(Clone, Default)]
pub struct RenderVersionController {
    raw: Arc<AtomicU64>,
}

impl RenderVersionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the version and return the new stamp.
    pub fn bump(&self) -> RenderVersion {
        self.update(RenderVersion::next)
    }

    pub fn current(&self) -> RenderVersion {
        RenderVersion::unpack(self.raw.load(Ordering::Acquire))
    }

    pub fn is_current(&self, version: RenderVersion) -> bool {
        self.current() == version
    }

    /// Start a new epoch with `seq` back at its initial value.
    /// Called when a different conversation becomes active.
    pub fn reset(&self) -> RenderVersion {
        let next = self.update(RenderVersion::next_epoch);
        debug!(version = %next, "Render version reset");
        next
    }

    fn update(&self, step: fn(RenderVersion) -> RenderVersion) -> RenderVersion {
        let previous = self
            .raw
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(step(RenderVersion::unpack(raw)).pack())
            })
            .unwrap_or_else(|raw| raw);
        step(RenderVersion::unpack(previous))
    }
}
