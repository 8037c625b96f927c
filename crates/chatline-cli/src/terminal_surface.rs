use std::io::Write;
use std::sync::Arc;

use chatline_core::render::{EntryKind, Notice, NoticeLevel, RenderCompletion, RenderFrame, RenderSurface};
use parking_lot::Mutex;

#[derive(Default)]
struct PrintState {
    /// Streaming text already written for the current response.
    printed: String,
    streaming: bool,
    last_notice: Option<Notice>,
}

/// Paints frames as an append-only terminal transcript.
///
/// A terminal cannot redraw, so each frame prints only the part of the
/// streaming entry the user has not seen yet.
pub struct TerminalSurface {
    state: Mutex<PrintState>,
    quiet: bool,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PrintState::default()),
            quiet: false,
        }
    }

    /// Applies frames without printing. Used by one-shot listing commands.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new()
        }
    }

    fn paint(&self, frame: &RenderFrame) {
        let mut state = self.state.lock();
        let mut out = std::io::stdout().lock();

        match frame.last_entry().map(|e| (e.kind, e.content.as_str())) {
            Some((EntryKind::Typing, _)) => {
                if !state.streaming {
                    state.streaming = true;
                    state.printed.clear();
                }
            }
            Some((EntryKind::Streaming, text)) => {
                state.streaming = true;
                write_unseen(&mut out, &mut state.printed, text);
            }
            Some((EntryKind::Assistant, text)) if state.streaming => {
                write_unseen(&mut out, &mut state.printed, text);
                let _ = writeln!(out);
                state.streaming = false;
                state.printed.clear();
            }
            _ if state.streaming => {
                if !state.printed.is_empty() {
                    let _ = writeln!(out);
                }
                state.streaming = false;
                state.printed.clear();
            }
            _ => {}
        }
        let _ = out.flush();

        if frame.notice != state.last_notice {
            if let Some(notice) = &frame.notice {
                print_notice(notice);
            }
            state.last_notice = frame.notice.clone();
        }
    }
}

fn write_unseen(out: &mut impl Write, printed: &mut String, text: &str) {
    match text.strip_prefix(printed.as_str()) {
        Some(unseen) => {
            let _ = write!(out, "{unseen}");
        }
        None => {
            // Text was replaced rather than extended; start a fresh line.
            let _ = write!(out, "\n{text}");
        }
    }
    printed.clear();
    printed.push_str(text);
}

pub fn print_notice(notice: &Notice) {
    let label = match notice.level {
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    };
    eprintln!("[{label}] {}", notice.title);
    if let Some(detail) = &notice.detail {
        eprintln!("  {detail}");
    }
    if let Some(suggestion) = &notice.suggestion {
        eprintln!("  {suggestion}");
    }
}

impl RenderSurface for TerminalSurface {
    fn render_async(&self, frame: Arc<RenderFrame>, completion: RenderCompletion) {
        if !self.quiet {
            self.paint(&frame);
        }
        // Painting is synchronous, so the frame is current unless a reset raced it.
        let _ = completion.complete();
    }
}
