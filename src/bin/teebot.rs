//! Multi-server chat bot.
//!
//! Connects to every server in the endpoint list, answers chat with generated
//! replies, and lets the operator broadcast from the console.
//!
//! # Usage
//!
//! ```bash
//! # Read settings.bot and ips.bot from the working directory
//! TEEBOT_API_KEY=... teebot
//!
//! # Use other files and disable colors
//! teebot --settings prod.json --servers prod.txt --no-color
//! ```
//!
//! # Commands
//!
//! - `/broadcast <text>` (or `/bc`) - Say something on every connected server
//! - `/stats` - Show connected servers, messages sent, uptime, and memory
//! - `/servers` - List servers and their state
//! - `/exit` (or `/quit`) - Say goodbye and exit
//!
//! Any other line is broadcast as-is.  Ctrl+C, SIGTERM, and end of input all
//! shut down the same way `/exit` does.

use std::process::ExitCode;
use std::sync::Arc;

use arrrg::CommandLine;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

use teebot::activity::{self, AppendLog};
use teebot::console::{Console, ConsoleInput, Flow, spawn_line_reader};
use teebot::generator::ResponseGenerator;
use teebot::{
    AddressBook, BotArgs, BotContext, ChatCompletions, DispatchPipeline, Error, LineConnector,
    PlainTextRenderer, Renderer, Result, SessionManager, Settings,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let (args, free) = BotArgs::from_command_line_relaxed("teebot [OPTIONS]");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,teebot=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let renderer: Arc<dyn Renderer> = Arc::new(PlainTextRenderer::with_color(!args.no_color));
    if !free.is_empty() {
        renderer.print_warn(&format!("ignoring extra arguments: {}", free.join(" ")));
    }

    let settings = load_settings(&args, renderer.as_ref());
    let error_log = AppendLog::new(&settings.error_log_path);
    activity::install_panic_hook(error_log.clone());

    match run(args, settings, Arc::clone(&renderer), &error_log).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            renderer.print_error(&format!("Startup failed: {err}"));
            if let Err(log_err) = error_log.record_failure("Startup failed", &err) {
                renderer.print_warn(&format!("could not write {}: {log_err}", error_log.path()));
            }
            ExitCode::FAILURE
        }
    }
}

/// Reads the settings file, creating it with defaults when it does not exist.
fn load_settings(args: &BotArgs, renderer: &dyn Renderer) -> Settings {
    let path = args.settings_path();
    if !path.exists() {
        return match Settings::write_defaults(&path) {
            Ok(settings) => {
                renderer.print_info(&format!("Created default settings in {}", path.as_str()));
                settings
            }
            Err(err) => {
                renderer.print_warn(&format!("{err}; using default settings"));
                Settings::default()
            }
        };
    }
    match Settings::load(&path) {
        Ok(settings) => settings,
        Err(err) => {
            renderer.print_warn(&format!("{err}; using default settings"));
            Settings::default()
        }
    }
}

async fn run(
    args: BotArgs,
    settings: Settings,
    renderer: Arc<dyn Renderer>,
    error_log: &AppendLog,
) -> Result<()> {
    renderer.print_info(&format!(
        "{} {} starting (model: {})",
        settings.clan, settings.display_name, settings.model
    ));

    let servers_path = args.servers_path();
    let book = AddressBook::load(&servers_path)?;
    for rejected in book.rejected() {
        renderer.print_warn(&format!(
            "{}:{}: skipping {:?}: {}",
            servers_path.as_str(),
            rejected.line,
            rejected.text,
            rejected.reason
        ));
    }
    renderer.print_info(&format!(
        "Loaded {} servers from {}",
        book.len(),
        servers_path.as_str()
    ));

    let client = ChatCompletions::with_options(args.api_key.clone(), args.api_url.clone(), None)?;
    let activity_log = AppendLog::new(&settings.activity_log_path);
    let activity_period = settings.activity_log_interval();
    let ctx = BotContext::new(settings, Arc::clone(&renderer));
    let generator = ResponseGenerator::new(Arc::new(client), &ctx.settings);
    let pipeline = Arc::new(DispatchPipeline::new(ctx.clone(), generator));
    let manager = Arc::new(SessionManager::start(
        book.into_endpoints(),
        ctx,
        &LineConnector::new(),
        pipeline,
    )?);
    teebot::register_biometrics(biometrics::Collector::new());

    let (signal_tx, mut signals) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    })
    .map_err(|err| Error::configuration(format!("cannot install signal handler: {err}"), None))?;

    renderer.print_info("Type /help for commands, /exit to quit");
    let console = Console::new(Arc::clone(&manager), Arc::clone(&renderer));
    let mut input = spawn_line_reader("> ");
    let mut activity_timer = interval_at(Instant::now() + activity_period, activity_period);

    loop {
        tokio::select! {
            line = input.recv() => match line {
                Some(ConsoleInput::Line(line)) => {
                    if console.handle_line(&line).await == Flow::Exit {
                        break;
                    }
                }
                Some(ConsoleInput::Interrupted) => break,
                Some(ConsoleInput::Failed(err)) => {
                    renderer.print_error(&format!("Input error: {err}"));
                    break;
                }
                Some(ConsoleInput::Eof) | None => break,
            },
            Some(()) = signals.recv() => {
                renderer.print_info("Received termination signal");
                break;
            }
            _ = activity_timer.tick() => {
                let line = manager.snapshot().activity_line(OffsetDateTime::now_utc());
                if let Err(err) = activity_log.append(&line) {
                    renderer.print_warn(&format!("{err}"));
                    let _ = error_log.record_failure("Activity log failed", &err);
                }
            }
        }
    }

    renderer.print_info("Shutting down...");
    let report = manager.shutdown_all().await;
    if report.timed_out {
        renderer.print_warn("Some servers did not acknowledge the disconnect in time");
    }
    renderer.print_success(&format!(
        "Disconnected from {}/{} servers. Goodbye!",
        report.disconnected, report.sessions
    ));
    Ok(())
}
