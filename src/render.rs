use std::io::Write;

use crate::error::SessionError;
use crate::session::{StreamMode, StreamingStats};

/// Where a response is drawn while it streams in.
pub trait RenderSurface {
    fn set_typing(&mut self, typing: bool);

    fn append_text(&mut self, text: &str);

    /// Drops partially rendered text before another attempt.
    fn discard_partial(&mut self);

    fn finish(&mut self, stats: &StreamingStats);

    fn show_error(&mut self, error: &SessionError);
}

/// Renders onto the terminal: text on stdout, indicators on stderr.
pub struct TerminalSurface {
    typing: bool,
    rendered_chars: usize,
    show_stats: bool,
}

impl TerminalSurface {
    pub fn new(show_stats: bool) -> Self {
        Self {
            typing: false,
            rendered_chars: 0,
            show_stats,
        }
    }

    fn clear_indicator(&mut self) {
        if self.typing {
            eprint!("\r\x1b[2K");
            let _ = std::io::stderr().flush();
        }
    }
}

impl RenderSurface for TerminalSurface {
    fn set_typing(&mut self, typing: bool) {
        if typing && !self.typing && self.rendered_chars == 0 {
            eprint!("\x1b[2m…\x1b[0m");
            let _ = std::io::stderr().flush();
        } else if !typing {
            self.clear_indicator();
        }
        self.typing = typing;
    }

    fn append_text(&mut self, text: &str) {
        if self.rendered_chars == 0 {
            self.clear_indicator();
        }
        self.rendered_chars += text.chars().count();
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn discard_partial(&mut self) {
        if self.rendered_chars > 0 {
            println!();
            eprintln!("\x1b[2m(partial response discarded, retrying)\x1b[0m");
        }
        self.rendered_chars = 0;
    }

    fn finish(&mut self, stats: &StreamingStats) {
        if self.rendered_chars > 0 {
            println!();
        }
        if self.show_stats {
            let mode = match stats.mode {
                StreamMode::Streaming => "streamed",
                StreamMode::Standard => "standard",
            };
            eprintln!(
                "\x1b[2m[{} | {} chunks | {} chars | {:.1}s | {:.1} words/s | attempt {}]\x1b[0m",
                mode,
                stats.chunk_count,
                stats.total_characters,
                stats.response_time_ms as f64 / 1000.0,
                stats.words_per_second,
                stats.attempts
            );
        }
        self.rendered_chars = 0;
    }

    fn show_error(&mut self, error: &SessionError) {
        self.clear_indicator();
        if self.rendered_chars > 0 {
            println!();
        }
        self.rendered_chars = 0;
        eprintln!("\x1b[1;31m{}\x1b[0m", error.user_message());
        for action in error.recovery_actions() {
            eprintln!("  - {}", action.label());
        }
    }
}
