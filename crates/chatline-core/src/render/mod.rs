pub mod frame;
pub mod pipeline;
pub mod render_surface;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use frame::{EntryKind, Notice, NoticeLevel, RenderFrame, RenderedEntry};
pub use pipeline::{RenderPipeline, RenderStats};
pub use render_surface::{RenderCompletion, RenderSurface, VisibleState};
