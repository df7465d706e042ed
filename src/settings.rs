//! Settings document and command-line arguments.
//!
//! Settings are read once at startup from a JSON document (`settings.bot` by
//! default) and never change afterwards.  Keys use the same names as the
//! settings file shipped with earlier releases, so existing files keep working.

use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};
use utf8path::Path;

use crate::error::{Error, Result};
use crate::transport::Identity;

/// Default settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "settings.bot";

/// Default endpoint list.
pub const DEFAULT_SERVERS_PATH: &str = "ips.bot";

/// Command-line arguments for the teebot binary.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct BotArgs {
    /// Settings document to read.
    #[arrrg(optional, "Settings file (default: settings.bot)", "PATH")]
    pub settings: Option<String>,

    /// Endpoint list to read.
    #[arrrg(optional, "Server list, one host:port per line (default: ips.bot)", "PATH")]
    pub servers: Option<String>,

    /// Completion API key.
    #[arrrg(optional, "Completion API key (default: $TEEBOT_API_KEY)", "KEY")]
    pub api_key: Option<String>,

    /// Completion API URL.
    #[arrrg(optional, "Chat completions URL (default: OpenRouter)", "URL")]
    pub api_url: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

impl BotArgs {
    /// The settings path, falling back to [`DEFAULT_SETTINGS_PATH`].
    pub fn settings_path(&self) -> Path<'static> {
        Path::from(self.settings.as_deref().unwrap_or(DEFAULT_SETTINGS_PATH)).into_owned()
    }

    /// The endpoint list path, falling back to [`DEFAULT_SERVERS_PATH`].
    pub fn servers_path(&self) -> Path<'static> {
        Path::from(self.servers.as_deref().unwrap_or(DEFAULT_SERVERS_PATH)).into_owned()
    }
}

/// Sends a fixed greeting instead of a generated reply when a given player's
/// chat line mentions a keyword (by default, when they join).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GreetTrigger {
    /// Player name to watch for, compared without regard to case.
    pub sender: String,
    /// Substring of the raw chat line that fires the trigger.
    #[serde(default = "default_join_keyword")]
    pub keyword: String,
    /// The line to send.
    pub greeting: String,
}

fn default_join_keyword() -> String {
    "joined".to_string()
}

impl GreetTrigger {
    /// True when `sender` is the watched player and `raw_text` mentions the keyword.
    pub fn matches(&self, sender: &str, raw_text: &str) -> bool {
        sender.to_lowercase() == self.sender.to_lowercase()
            && raw_text
                .to_lowercase()
                .contains(&self.keyword.to_lowercase())
    }
}

/// Process-wide settings, read-only after load.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Name presented to every server; chat from this name is never answered.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Clan tag presented to every server.
    pub clan: String,
    /// Reconnects allowed per session before it is retired.
    #[serde(rename = "reconnectAttempts")]
    pub max_reconnect_attempts: u32,
    /// Base of the linear reconnect backoff.
    #[serde(rename = "reconnectBaseDelay")]
    pub reconnect_base_delay_ms: u64,
    /// Pause between deciding on a reply and sending it.
    #[serde(rename = "responseDelay")]
    pub response_delay_ms: u64,
    /// Pause between consecutive sends of a broadcast.
    #[serde(rename = "messageDelay")]
    pub inter_send_delay_ms: u64,
    /// Sent on every successful connect.
    pub greeting: String,
    /// Sent to each connected server before disconnecting at shutdown.
    pub farewell: String,
    /// Optional fixed greeting for one player.
    pub greet_on_join: Option<GreetTrigger>,
    /// Completion model.
    pub model: String,
    /// Token budget for each completion.
    pub max_tokens: u32,
    /// Upper bound on each shutdown phase.
    #[serde(rename = "shutdownGrace")]
    pub shutdown_grace_ms: u64,
    /// Period of the activity log snapshot.
    #[serde(rename = "activityLogInterval")]
    pub activity_log_interval_ms: u64,
    /// Append-only activity log.
    pub activity_log_path: String,
    /// Append-only failure log.
    pub error_log_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: "TeeAI".to_string(),
            clan: "[BOT]".to_string(),
            max_reconnect_attempts: 3,
            reconnect_base_delay_ms: 5_000,
            response_delay_ms: 3_000,
            inter_send_delay_ms: 500,
            greeting: "Hi! I'm here to chat.".to_string(),
            farewell: "Goodbye!".to_string(),
            greet_on_join: None,
            model: "deepseek/deepseek-chat".to_string(),
            max_tokens: 100,
            shutdown_grace_ms: 5_000,
            activity_log_interval_ms: 300_000,
            activity_log_path: "activity.log".to_string(),
            error_log_path: "error.log".to_string(),
        }
    }
}

impl Settings {
    /// Parses and validates a settings document.  Missing keys take their defaults.
    pub fn parse(text: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and validates the settings document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_str())
            .map_err(|err| Error::io(format!("could not read {}: {err}", path.as_str()), err))?;
        Self::parse(&text).map_err(|err| match err {
            Error::Configuration { message, .. } => {
                Error::configuration(message, Some(path.as_str().to_string()))
            }
            err => err,
        })
    }

    /// Writes the default settings to `path` and returns them.
    pub fn write_defaults(path: &Path) -> Result<Self> {
        let settings = Settings::default();
        let text = serde_json::to_string_pretty(&settings)?;
        std::fs::write(path.as_str(), text)
            .map_err(|err| Error::io(format!("could not write {}: {err}", path.as_str()), err))?;
        Ok(settings)
    }

    /// Rejects settings the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.display_name.trim().is_empty() {
            return Err(Error::configuration("name must not be empty", None));
        }
        if self.max_tokens == 0 {
            return Err(Error::configuration("maxTokens must be positive", None));
        }
        if self.model.trim().is_empty() {
            return Err(Error::configuration("model must not be empty", None));
        }
        Ok(())
    }

    /// The identity every session presents.
    pub fn identity(&self) -> Identity {
        Identity {
            name: self.display_name.clone(),
            clan: self.clan.clone(),
        }
    }

    /// Delay before the `attempt`-th reconnect: `base * attempt`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms.saturating_mul(attempt as u64))
    }

    /// Pause before sending a generated reply.
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }

    /// Pause between broadcast sends.
    pub fn inter_send_delay(&self) -> Duration {
        Duration::from_millis(self.inter_send_delay_ms)
    }

    /// Upper bound on each shutdown phase.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Period of the activity log snapshot.
    pub fn activity_log_interval(&self) -> Duration {
        Duration::from_millis(self.activity_log_interval_ms.max(1))
    }
}
