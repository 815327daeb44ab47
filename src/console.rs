//! Terminal status line for the interaction loop
//!
//! On a TTY the console keeps one stderr line alive, `\r`-rewriting it with
//! the current state, a level meter while listening, and the latest status
//! text. When stderr is piped, level updates are dropped and everything else
//! degrades to plain lines. Conversation history always goes to stdout.

use std::io::{self, IsTerminal, Write};

use crate::backend::HistoryMessage;

const BAR_WIDTH: usize = 20;
/// RMS that pegs the meter; matches loud close-mic speech
const BAR_FULL_SCALE: f32 = 0.1;
const STATUS_WIDTH: usize = 50;
const IDLE_HINT: &str = "press Enter to talk";

/// Render an RMS level as a fixed-width meter
fn level_bar(rms: f32) -> String {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((rms / BAR_FULL_SCALE).clamp(0.0, 1.0) * BAR_WIDTH as f32) as usize;
    let mut bar = String::with_capacity(BAR_WIDTH * 3);
    for i in 0..BAR_WIDTH {
        bar.push(if i < filled { '█' } else { '░' });
    }
    bar
}

/// Clip status text so the line never wraps and breaks `\r` rewrites
fn truncate_status(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// One-line terminal display, degrading to plain lines off a TTY
pub struct Console {
    interactive: bool,
    state_label: String,
    status: String,
    level: Option<f32>,
}

impl Console {
    /// Auto-detect whether stderr supports in-place rewriting
    #[must_use]
    pub fn new() -> Self {
        Self::with_interactivity(io::stderr().is_terminal())
    }

    /// Force plain line output regardless of the terminal
    #[must_use]
    pub fn plain() -> Self {
        Self::with_interactivity(false)
    }

    fn with_interactivity(interactive: bool) -> Self {
        Self {
            interactive,
            state_label: String::new(),
            status: String::new(),
            level: None,
        }
    }

    /// Show a new interaction state; entering a state clears the meter
    pub fn set_state(&mut self, label: &str) {
        if self.state_label == label {
            return;
        }
        self.state_label = label.to_string();
        self.level = None;
        if self.interactive {
            self.redraw();
        } else {
            eprintln!("[{label}]");
        }
    }

    /// Replace the status text
    pub fn set_status(&mut self, text: &str) {
        self.status = text.to_string();
        if self.interactive {
            self.redraw();
        } else if !text.is_empty() {
            eprintln!("{text}");
        }
    }

    /// Drop the status text
    pub fn clear_status(&mut self) {
        self.status.clear();
        if self.interactive {
            self.redraw();
        }
    }

    /// Update the level meter; dropped entirely in plain mode
    pub fn set_level(&mut self, rms: f32) {
        if !self.interactive {
            return;
        }
        self.level = Some(rms);
        self.redraw();
    }

    /// Remove the level meter from the line
    pub fn clear_level(&mut self) {
        if self.level.take().is_some() && self.interactive {
            self.redraw();
        }
    }

    /// Print the last `window` entries of the conversation to stdout
    ///
    /// The status line is erased first and restored after, so history lines
    /// land cleanly above it.
    pub fn render_history(&mut self, messages: &[HistoryMessage], window: usize) {
        if self.interactive {
            erase_line();
        }
        let start = messages.len().saturating_sub(window);
        for message in &messages[start..] {
            println!("{:>9} │ {}", message.role, message.content);
        }
        let _ = io::stdout().flush();
        if self.interactive {
            self.redraw();
        }
    }

    /// Leave the status line behind and move to a fresh row
    pub fn finish(&mut self) {
        if self.interactive {
            eprintln!();
        }
    }

    fn redraw(&self) {
        let meter = self
            .level
            .map(|rms| format!(" {}", level_bar(rms)))
            .unwrap_or_default();
        let status = if self.status.is_empty() && self.state_label == "idle" {
            IDLE_HINT
        } else {
            &self.status
        };
        eprint!(
            "\r\x1b[2K[{}]{meter} {}",
            self.state_label,
            truncate_status(status, STATUS_WIDTH)
        );
        let _ = io::stderr().flush();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

fn erase_line() {
    eprint!("\r\x1b[2K");
    let _ = io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bar_is_empty_at_silence() {
        assert_eq!(level_bar(0.0), "░".repeat(20));
    }

    #[test]
    fn level_bar_pegs_at_full_scale() {
        assert_eq!(level_bar(0.1), "█".repeat(20));
        assert_eq!(level_bar(5.0), "█".repeat(20));
    }

    #[test]
    fn level_bar_fills_proportionally() {
        let bar = level_bar(0.05);
        assert_eq!(bar.chars().filter(|&c| c == '█').count(), 10);
        assert_eq!(bar.chars().count(), 20);
    }

    #[test]
    fn truncate_keeps_short_text_verbatim() {
        assert_eq!(truncate_status("hello", 50), "hello");
    }

    #[test]
    fn truncate_clips_long_text_with_ellipsis() {
        let long = "x".repeat(80);
        let clipped = truncate_status(&long, 50);
        assert_eq!(clipped.chars().count(), 50);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        let text = "é".repeat(60);
        let clipped = truncate_status(&text, 50);
        assert_eq!(clipped.chars().count(), 50);
    }

    #[test]
    fn plain_console_renders_without_panicking() {
        // Smoke test; plain mode writes lines to stderr
        let mut console = Console::plain();
        console.set_state("listening");
        console.set_level(0.05);
        console.set_status("hello");
        console.clear_status();
        console.clear_level();
        console.set_state("idle");
        console.render_history(
            &[HistoryMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            6,
        );
        console.finish();
    }

    #[test]
    fn repeated_state_is_not_reprinted() {
        let mut console = Console::plain();
        console.set_state("idle");
        // Idempotent; the second call is a no-op rather than a duplicate line
        console.set_state("idle");
        assert_eq!(console.state_label, "idle");
    }
}
