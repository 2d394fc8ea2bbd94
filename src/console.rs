//! Single-line terminal progress on stderr.

use std::io::{self, Write};
use std::sync::Mutex;

use crossterm::QueueableCommand;
use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};

use crate::app::{ProgressEvent, ProgressSink};
use crate::progress::Percent;

const BAR_WIDTH: usize = 30;

#[derive(Debug, Default)]
struct LineState {
    label: String,
    percent: Option<Percent>,
    status: String,
    dirty: bool,
}

/// Redraws one progress line in place. Step changes and completed files are
/// printed above it as regular lines.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    state: Mutex<LineState>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn redraw(&self, state: &LineState) -> io::Result<()> {
        let mut stderr = io::stderr();
        let line = match state.percent {
            Some(percent) => format!("{} {} {}", state.label, render_bar(percent, BAR_WIDTH), state.status),
            None => state.label.clone(),
        };
        stderr
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(line))?;
        stderr.flush()
    }

    fn print_above(&self, state: &LineState, message: &str) -> io::Result<()> {
        let mut stderr = io::stderr();
        stderr
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(format!("{message}\n")))?;
        stderr.flush()?;
        if state.dirty {
            self.redraw(state)?;
        }
        Ok(())
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        // Write errors are ignored.
        let _ = match event {
            ProgressEvent::Step { phase, message } => {
                state.label = format!("[{phase}] {message}");
                state.percent = None;
                state.status.clear();
                state.dirty = true;
                self.redraw(&state)
            }
            ProgressEvent::Progress { percent, status, .. } => {
                state.percent = Some(percent);
                state.status = status;
                state.dirty = true;
                self.redraw(&state)
            }
            ProgressEvent::FileCompleted { path, size, .. } => self.print_above(
                &state,
                &format!("  completed {} ({})", path.display(), crate::fs_util::format_bytes(size)),
            ),
            ProgressEvent::Finished { phase, success } => {
                state.dirty = false;
                let verdict = if success { "done" } else { "failed" };
                self.print_above(&state, &format!("[{phase}] {verdict}"))
            }
        };
    }
}

/// `[#####.....]  50%`, or a `~` bar when the total is unknown.
pub fn render_bar(percent: Percent, width: usize) -> String {
    match percent {
        Percent::Known(value) => {
            let value = usize::from(value.min(100));
            let filled = value * width / 100;
            format!(
                "[{}{}] {value:>3}%",
                "#".repeat(filled),
                ".".repeat(width - filled)
            )
        }
        Percent::Indeterminate => format!("[{}]   ?", "~".repeat(width)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(render_bar(Percent::Known(50), 10), "[#####.....]  50%");
        assert_eq!(render_bar(Percent::Known(100), 4), "[####] 100%");
        assert_eq!(render_bar(Percent::Indeterminate, 3), "[~~~]   ?");
    }
}
