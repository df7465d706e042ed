//! Operator console.
//!
//! A blocking line editor runs on its own thread and forwards lines to the
//! runtime over a channel.  [`Console::execute`] carries out each parsed
//! command against the [`SessionManager`].

mod commands;

use std::sync::Arc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use crate::render::Renderer;
use crate::session::SessionManager;

pub use commands::{ConsoleCommand, help_text, parse_command};

/// One event from the line reader thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// A line the operator typed.
    Line(String),
    /// Ctrl+C at the prompt.
    Interrupted,
    /// The input stream ended.
    Eof,
    /// The editor failed.
    Failed(String),
}

/// Starts a thread that reads lines with `prompt` until the input ends or the
/// receiver is dropped.
pub fn spawn_line_reader(prompt: &str) -> mpsc::UnboundedReceiver<ConsoleInput> {
    let (tx, rx) = mpsc::unbounded_channel();
    let prompt = prompt.to_string();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(err) => {
                let _ = tx.send(ConsoleInput::Failed(err.to_string()));
                return;
            }
        };
        loop {
            let input = match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                    ConsoleInput::Line(line)
                }
                Err(ReadlineError::Interrupted) => ConsoleInput::Interrupted,
                Err(ReadlineError::Eof) => ConsoleInput::Eof,
                Err(err) => ConsoleInput::Failed(err.to_string()),
            };
            let last = !matches!(input, ConsoleInput::Line(_));
            if tx.send(input).is_err() || last {
                break;
            }
        }
    });
    rx
}

/// Whether the console loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Begin shutdown.
    Exit,
}

/// Executes console commands.
pub struct Console {
    manager: Arc<SessionManager>,
    renderer: Arc<dyn Renderer>,
}

impl Console {
    /// Creates a console driving `manager`.
    pub fn new(manager: Arc<SessionManager>, renderer: Arc<dyn Renderer>) -> Self {
        Self { manager, renderer }
    }

    /// Parses and executes one raw line.
    pub async fn handle_line(&self, line: &str) -> Flow {
        match parse_command(line) {
            Some(command) => self.execute(command).await,
            None => Flow::Continue,
        }
    }

    /// Executes one command.
    pub async fn execute(&self, command: ConsoleCommand) -> Flow {
        match command {
            ConsoleCommand::Broadcast(text) => {
                let report = self.manager.broadcast(&text).await;
                if report.attempted == 0 {
                    self.renderer.print_warn("No connected servers to broadcast to");
                } else {
                    self.renderer.print_info(&format!(
                        "Broadcast delivered to {}/{} servers",
                        report.delivered, report.attempted
                    ));
                }
            }
            ConsoleCommand::Stats => {
                for line in self.manager.snapshot().report_lines() {
                    self.renderer.print_info(&line);
                }
            }
            ConsoleCommand::Servers => {
                for session in self.manager.sessions() {
                    let status = session.status();
                    let retired = if status.retired { ", gave up" } else { "" };
                    self.renderer.print_info(&format!(
                        "  {} {}: {} (reconnects: {}{retired})",
                        session.id(),
                        session.endpoint(),
                        status.state,
                        status.reconnect_count
                    ));
                }
            }
            ConsoleCommand::Help => {
                for line in help_text().lines() {
                    self.renderer.print_info(&format!("    {line}"));
                }
            }
            ConsoleCommand::Exit => return Flow::Exit,
            ConsoleCommand::Invalid(message) => self.renderer.print_warn(&message),
        }
        Flow::Continue
    }
}
