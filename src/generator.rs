//! Reply generation.
//!
//! [`ResponseGenerator`] decides whether a chat message deserves a reply at all,
//! asks the completion backend for one, and shapes the answer so it fits in a
//! single chat line.  It never fails: a backend error turns into a fixed
//! fallback line naming the sender.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::client::{Completer, CompletionRequest};
use crate::error::Error;
use crate::observability::{
    GENERATOR_DURATION, GENERATOR_FAILURES, GENERATOR_FILTERED, GENERATOR_REQUESTS,
};
use crate::settings::Settings;

/// Longest line the game servers reliably accept.
pub const MAX_REPLY_CHARS: usize = 160;

const ELLIPSIS: &str = "...";

/// Messages starting with one of these are commands for the server, not chat.
pub const COMMAND_PREFIXES: &[char] = &['/', '!'];

/// Phrases that mark server notices and other chatter not worth answering.
pub const DENYLIST: &[&str] = &[
    "our community",
    "joined",
    "left",
    "entered",
    "muted",
    "not permitted",
    "version",
    "visit",
    "rules",
    "welcome",
    "server",
    "spectator",
    "connecting",
    "disconnected",
];

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer briefly (at most 160 characters).";

/// Why a message was or was not passed on to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Worth a reply.
    Accept,
    /// Empty or a single character.
    TooShort,
    /// Starts with a command prefix.
    Command,
    /// Contains a denylisted phrase.
    Denylisted(&'static str),
}

impl fmt::Display for FilterVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterVerdict::Accept => write!(f, "accepted"),
            FilterVerdict::TooShort => write!(f, "too short"),
            FilterVerdict::Command => write!(f, "command"),
            FilterVerdict::Denylisted(phrase) => write!(f, "contains {phrase:?}"),
        }
    }
}

/// Classifies `text` without touching the network.
pub fn filter_message(text: &str) -> FilterVerdict {
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return FilterVerdict::TooShort;
    }
    if trimmed.starts_with(COMMAND_PREFIXES) {
        return FilterVerdict::Command;
    }
    let lowercase = trimmed.to_lowercase();
    if let Some(phrase) = DENYLIST.iter().find(|phrase| lowercase.contains(*phrase)) {
        return FilterVerdict::Denylisted(phrase);
    }
    FilterVerdict::Accept
}

/// Collapses every line break to one space and caps the result at
/// [`MAX_REPLY_CHARS`] characters, ending in `...` when cut.
pub fn shape_reply(raw: &str) -> String {
    let single_line = raw.replace("\r\n", " ").replace(['\r', '\n'], " ");
    let single_line = single_line.trim();
    if single_line.chars().count() <= MAX_REPLY_CHARS {
        return single_line.to_string();
    }
    let keep = MAX_REPLY_CHARS - ELLIPSIS.len();
    let mut shaped: String = single_line.chars().take(keep).collect();
    shaped.push_str(ELLIPSIS);
    shaped
}

/// The line sent when the backend cannot be reached.
pub fn fallback_reply(sender: &str) -> String {
    format!("{sender}: I'm rate limited or something went wrong")
}

/// What [`ResponseGenerator::generate_detailed`] decided.
#[derive(Clone, Debug)]
pub enum Generated {
    /// Filtered out before any remote call.
    Filtered(FilterVerdict),
    /// The backend answered.
    Reply(String),
    /// The backend answered with nothing but whitespace.
    Blank,
    /// The backend failed; `reply` is the fallback line.
    Fallback {
        /// Line to send instead.
        reply: String,
        /// What went wrong.
        error: Error,
    },
}

impl Generated {
    /// The line to send, if any.
    pub fn into_reply(self) -> Option<String> {
        match self {
            Generated::Filtered(_) | Generated::Blank => None,
            Generated::Reply(reply) => Some(reply),
            Generated::Fallback { reply, .. } => Some(reply),
        }
    }
}

/// Wraps a [`Completer`] with filtering, prompt shaping, truncation, and fallback.
pub struct ResponseGenerator {
    completer: Arc<dyn Completer>,
    model: String,
    max_tokens: u32,
}

impl ResponseGenerator {
    /// Creates a generator using the model and token budget from `settings`.
    pub fn new(completer: Arc<dyn Completer>, settings: &Settings) -> Self {
        Self {
            completer,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    /// Builds the request for a message from `sender`.
    pub fn request_for(&self, text: &str, sender: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: format!(
                "Reply to \"{text}\" in the language it was written in, at most {MAX_REPLY_CHARS} characters, \
                 starting with \"{sender}:\", without emoji or emotional language"
            ),
            max_tokens: self.max_tokens,
        }
    }

    /// Returns the reply to send, or `None` when the message was filtered out
    /// or the backend had nothing to say.
    pub async fn generate(&self, text: &str, sender: &str) -> Option<String> {
        self.generate_detailed(text, sender).await.into_reply()
    }

    /// Like [`ResponseGenerator::generate`] but reports why.
    pub async fn generate_detailed(&self, text: &str, sender: &str) -> Generated {
        let verdict = filter_message(text);
        if verdict != FilterVerdict::Accept {
            GENERATOR_FILTERED.click();
            tracing::debug!(sender, %verdict, "not replying");
            return Generated::Filtered(verdict);
        }

        GENERATOR_REQUESTS.click();
        let request = self.request_for(text, sender);
        let start = Instant::now();
        let result = self.completer.complete(&request).await;
        GENERATOR_DURATION.add(start.elapsed().as_secs_f64());

        match result {
            Ok(raw) => {
                let reply = shape_reply(&raw);
                if reply.is_empty() {
                    GENERATOR_FILTERED.click();
                    tracing::debug!(sender, "blank completion; not replying");
                    return Generated::Blank;
                }
                Generated::Reply(reply)
            }
            Err(error) => {
                GENERATOR_FAILURES.click();
                tracing::warn!(sender, %error, "completion failed; using fallback");
                Generated::Fallback {
                    reply: shape_reply(&fallback_reply(sender)),
                    error,
                }
            }
        }
    }
}
