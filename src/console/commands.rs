//! Operator command parsing.
//!
//! Lines that start with `/` are commands; anything else is broadcast verbatim.

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Send the text to every connected server.
    Broadcast(String),

    /// Show connection and message statistics.
    Stats,

    /// List every server and its connection state.
    Servers,

    /// Display help information.
    Help,

    /// Say goodbye everywhere and exit.
    Exit,

    /// Report a parsing error back to the operator.
    Invalid(String),
}

/// Parses one console line.
///
/// Returns `None` for blank input.
///
/// # Examples
///
/// ```
/// # use teebot::console::{ConsoleCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ConsoleCommand::Exit));
/// assert_eq!(
///     parse_command("hello all"),
///     Some(ConsoleCommand::Broadcast("hello all".to_string()))
/// );
/// assert!(parse_command("   ").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ConsoleCommand> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let Some(rest) = input.strip_prefix('/') else {
        return Some(ConsoleCommand::Broadcast(input.to_string()));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "broadcast" | "bc" => match argument {
            Some(text) => ConsoleCommand::Broadcast(text.to_string()),
            None => ConsoleCommand::Invalid(format!("usage: /{command} <message>")),
        },
        "stats" => ConsoleCommand::Stats,
        "servers" => ConsoleCommand::Servers,
        "help" | "?" => ConsoleCommand::Help,
        "exit" | "quit" => ConsoleCommand::Exit,
        _ => ConsoleCommand::Invalid(format!(
            "Unknown command: /{command} (type /help for commands)"
        )),
    };

    Some(result)
}

/// Returns help text describing every command.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /broadcast <message>   Send a message to every connected server (alias /bc)
  /stats                 Show connection and message statistics
  /servers               List servers and their connection state
  /help                  Show this help message
  /exit                  Say goodbye and exit (alias /quit)
Any other text is broadcast as-is."#
}
