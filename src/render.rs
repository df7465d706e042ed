//! Operator console output.
//!
//! Everything the operator sees goes through a [`Renderer`], one line per call,
//! with a severity the renderer may colour.  Diagnostic detail goes to
//! `tracing` instead.

use std::io::{self, Write};

use crate::address::Endpoint;
use crate::transport::{InboundChatEvent, Scope};

/// ANSI escape code for dim text (used for skipped messages).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for bold text.
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for cyan text (used for endpoints).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for warnings and team chat).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for successes).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for magenta text (used for player names).
const ANSI_MAGENTA: &str = "\x1b[35m";

/// Sink for operator-visible lines.
pub trait Renderer: Send + Sync {
    /// Print an informational line.
    fn print_info(&self, info: &str);

    /// Print a line reporting something that worked.
    fn print_success(&self, message: &str);

    /// Print a low-importance line, such as a skipped chat message.
    fn print_muted(&self, message: &str);

    /// Print a warning.
    fn print_warn(&self, warning: &str);

    /// Print an error.
    fn print_error(&self, error: &str);

    /// Print a chat line heard on `endpoint`.
    fn print_chat(&self, endpoint: &Endpoint, event: &InboundChatEvent, message: &str);
}

/// Plain text renderer with optional ANSI styling.
///
/// Errors go to stderr; everything else goes to stdout.
#[derive(Clone, Debug)]
pub struct PlainTextRenderer {
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self { use_color: true }
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self { use_color }
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn line(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
        let _ = stdout.flush();
    }

    /// Formats a chat line without printing it.
    pub fn format_chat(&self, endpoint: &Endpoint, event: &InboundChatEvent, message: &str) -> String {
        let scope = match event.scope {
            Scope::All => self.styled(ANSI_BOLD, "[all]"),
            Scope::Team => self.styled(ANSI_YELLOW, "[team]"),
            Scope::Other => self.styled(ANSI_DIM, "[other]"),
        };
        format!(
            "{scope} {} {}: {message}",
            self.styled(ANSI_CYAN, &format!("[{endpoint}]")),
            self.styled(ANSI_MAGENTA, &event.sender),
        )
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_info(&self, info: &str) {
        self.line(info);
    }

    fn print_success(&self, message: &str) {
        self.line(&self.styled(ANSI_GREEN, message));
    }

    fn print_muted(&self, message: &str) {
        self.line(&self.styled(ANSI_DIM, message));
    }

    fn print_warn(&self, warning: &str) {
        self.line(&self.styled(ANSI_YELLOW, &format!("Warning: {warning}")));
    }

    fn print_error(&self, error: &str) {
        eprintln!("{}", self.styled(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_chat(&self, endpoint: &Endpoint, event: &InboundChatEvent, message: &str) {
        self.line(&self.format_chat(endpoint, event, message));
    }
}
