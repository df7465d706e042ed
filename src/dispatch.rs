//! Inbound chat handling.
//!
//! Each session task hands its chat events to [`DispatchPipeline::on_inbound_chat`]
//! one at a time, so replies on one server never overtake each other.  Other
//! sessions keep running while one of them waits on the completion call or the
//! response delay.

use std::time::Duration;

use crate::context::BotContext;
use crate::generator::ResponseGenerator;
use crate::observability::{DISPATCH_IGNORED, DISPATCH_INBOUND, DISPATCH_REPLIES, DISPATCH_SEND_ERRORS};
use crate::session::Session;
use crate::transport::{InboundChatEvent, Scope};

/// A chat line split into its `name: message` halves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedChat<'a> {
    /// Text before the first colon, trimmed.
    pub name: &'a str,
    /// Text after the first colon, trimmed.
    pub message: &'a str,
}

/// Splits `raw` at its first colon.  Both halves must be non-empty once trimmed.
pub fn parse_chat_line(raw: &str) -> Option<ParsedChat<'_>> {
    let (name, message) = raw.split_once(':')?;
    let name = name.trim();
    let message = message.trim();
    if name.is_empty() || message.is_empty() {
        return None;
    }
    Some(ParsedChat { name, message })
}

/// What happened to one inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a `name: message` line.
    Unparsed,
    /// Sent by the bot itself.
    OwnMessage,
    /// Neither all-chat nor team chat.
    OutOfScope,
    /// The greet trigger fired and the greeting went out.
    Greeted,
    /// The generator declined to answer.
    Filtered,
    /// A reply was sent.
    Replied(String),
    /// A reply or greeting could not be sent.
    SendFailed,
    /// Shutdown began before the reply went out.
    Cancelled,
}

/// Classifies inbound chat and answers it through the owning session.
pub struct DispatchPipeline {
    ctx: BotContext,
    generator: ResponseGenerator,
}

impl DispatchPipeline {
    /// Creates a pipeline that answers with `generator`.
    pub fn new(ctx: BotContext, generator: ResponseGenerator) -> Self {
        Self { ctx, generator }
    }

    /// Handles one chat event heard on `session`.
    pub async fn on_inbound_chat(&self, session: &Session, event: InboundChatEvent) -> DispatchOutcome {
        DISPATCH_INBOUND.click();
        let Some(parsed) = parse_chat_line(&event.raw_text) else {
            DISPATCH_IGNORED.click();
            tracing::trace!(endpoint = %session.endpoint(), raw = %event.raw_text, "unparsed chat line");
            return DispatchOutcome::Unparsed;
        };
        if event.sender == self.ctx.settings.display_name {
            DISPATCH_IGNORED.click();
            return DispatchOutcome::OwnMessage;
        }
        if event.scope == Scope::Other {
            DISPATCH_IGNORED.click();
            return DispatchOutcome::OutOfScope;
        }
        self.ctx
            .renderer
            .print_chat(session.endpoint(), &event, parsed.message);

        if let Some(trigger) = &self.ctx.settings.greet_on_join
            && trigger.matches(&event.sender, &event.raw_text)
        {
            return match session.send(&trigger.greeting).await {
                Ok(()) => {
                    self.ctx.stats.record_sent();
                    self.ctx.renderer.print_success(&format!(
                        "Greeted {} on {}",
                        event.sender,
                        session.endpoint()
                    ));
                    DispatchOutcome::Greeted
                }
                Err(err) => self.send_failed(session, &err),
            };
        }

        let Some(reply) = self.generator.generate(parsed.message, &event.sender).await else {
            self.ctx.renderer.print_muted(&format!(
                "Skipping message from {}",
                event.sender
            ));
            return DispatchOutcome::Filtered;
        };

        self.ctx
            .renderer
            .print_info(&format!("Preparing a reply for {}...", event.sender));
        if !self.pause(self.ctx.settings.response_delay()).await {
            return DispatchOutcome::Cancelled;
        }
        match session.send(&reply).await {
            Ok(()) => {
                DISPATCH_REPLIES.click();
                self.ctx.stats.record_sent();
                self.ctx
                    .renderer
                    .print_success(&format!("Sent: {reply}"));
                DispatchOutcome::Replied(reply)
            }
            Err(err) => self.send_failed(session, &err),
        }
    }

    /// Sleeps for `delay`; false if shutdown began first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.ctx.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn send_failed(&self, session: &Session, err: &crate::error::Error) -> DispatchOutcome {
        DISPATCH_SEND_ERRORS.click();
        self.ctx
            .renderer
            .print_error(&format!("Could not send on {}: {err}", session.endpoint()));
        DispatchOutcome::SendFailed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::Error;
    use crate::settings::{GreetTrigger, Settings};
    use crate::testing::{
        FakeTransport, RecordingRenderer, Severity, StubCompleter, connected_session,
    };

    fn pipeline(
        settings: Settings,
        completer: Arc<StubCompleter>,
    ) -> (DispatchPipeline, BotContext, Arc<RecordingRenderer>) {
        let renderer = RecordingRenderer::new();
        let ctx = BotContext::new(settings, renderer.clone());
        let generator = ResponseGenerator::new(completer, &ctx.settings);
        (DispatchPipeline::new(ctx.clone(), generator), ctx, renderer)
    }

    fn chat(sender: &str, raw: &str, scope: Scope) -> InboundChatEvent {
        InboundChatEvent::new(sender, raw, scope)
    }

    #[test]
    fn parse_name_and_message() {
        assert_eq!(
            parse_chat_line("alice: hello there"),
            Some(ParsedChat {
                name: "alice",
                message: "hello there"
            })
        );
        assert_eq!(
            parse_chat_line("bob:  time: 12:00 "),
            Some(ParsedChat {
                name: "bob",
                message: "time: 12:00"
            })
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(parse_chat_line("no colon here"), None);
        assert_eq!(parse_chat_line(": nobody"), None);
        assert_eq!(parse_chat_line("alice:   "), None);
        assert_eq!(parse_chat_line(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn replies_after_response_delay() {
        let completer = StubCompleter::replying("alice: hi\nthere");
        let (pipeline, ctx, _) = pipeline(Settings::default(), completer.clone());
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let start = tokio::time::Instant::now();
        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "alice: hello there", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied("alice: hi there".to_string()));
        assert_eq!(start.elapsed(), Duration::from_millis(3_000));
        assert_eq!(transport.sent(), vec!["alice: hi there"]);
        assert_eq!(ctx.stats.total_sent(), 1);
        let requests = completer.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user_prompt.contains("hello there"));
        assert!(requests[0].user_prompt.contains("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn denylisted_server_line_is_not_answered() {
        let completer = StubCompleter::replying("never");
        let (pipeline, ctx, renderer) = pipeline(Settings::default(), completer.clone());
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("SERVER", "SERVER: Player joined", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::Filtered);
        assert_eq!(completer.calls(), 0);
        assert!(transport.sent().is_empty());
        assert_eq!(ctx.stats.total_sent(), 0);
        assert_eq!(renderer.lines(Severity::Chat).len(), 1);
    }

    #[tokio::test]
    async fn unparsed_lines_leave_no_trace() {
        let completer = StubCompleter::replying("never");
        let (pipeline, _, renderer) = pipeline(Settings::default(), completer.clone());
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "just words", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::Unparsed);
        assert_eq!(completer.calls(), 0);
        assert!(transport.sent().is_empty());
        assert!(renderer.lines(Severity::Chat).is_empty());
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let completer = StubCompleter::replying("never");
        let (pipeline, _, _) = pipeline(Settings::default(), completer.clone());
        let (session, _) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("TeeAI", "TeeAI: hello everyone", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::OwnMessage);
        assert_eq!(completer.calls(), 0);
    }

    #[tokio::test]
    async fn other_scope_is_ignored() {
        let completer = StubCompleter::replying("never");
        let (pipeline, _, renderer) = pipeline(Settings::default(), completer.clone());
        let (session, _) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "alice: psst", Scope::Other))
            .await;
        assert_eq!(outcome, DispatchOutcome::OutOfScope);
        assert_eq!(completer.calls(), 0);
        assert!(renderer.lines(Severity::Chat).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn team_chat_is_answered() {
        let completer = StubCompleter::replying("bob: sure");
        let (pipeline, _, _) = pipeline(Settings::default(), completer);
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("bob", "bob: cover me", Scope::Team))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied("bob: sure".to_string()));
        assert_eq!(transport.sent(), vec!["bob: sure"]);
    }

    #[tokio::test(start_paused = true)]
    async fn greet_trigger_bypasses_generator() {
        let settings = Settings {
            greet_on_join: Some(GreetTrigger {
                sender: "strew".to_string(),
                keyword: "joined".to_string(),
                greeting: "hi, strew!".to_string(),
            }),
            ..Settings::default()
        };
        let completer = StubCompleter::replying("never");
        let (pipeline, ctx, _) = pipeline(settings, completer.clone());
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let start = tokio::time::Instant::now();
        let outcome = pipeline
            .on_inbound_chat(&session, chat("Strew", "Strew: I just joined", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::Greeted);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.sent(), vec!["hi, strew!"]);
        assert_eq!(completer.calls(), 0);
        assert_eq!(ctx.stats.total_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generator_failure_sends_fallback() {
        let completer = StubCompleter::failing(Error::rate_limit("slow down", None));
        let (pipeline, _, _) = pipeline(Settings::default(), completer);
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "alice: how are you", Scope::All))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Replied(_)));
        assert_eq!(
            transport.sent(),
            vec!["alice: I'm rate limited or something went wrong"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blank_completion_sends_nothing() {
        let completer = StubCompleter::replying("  \n ");
        let (pipeline, ctx, renderer) = pipeline(Settings::default(), completer.clone());
        let (session, transport) = connected_session(0, "10.0.0.1:8303");

        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "alice: hello there", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::Filtered);
        assert_eq!(completer.calls(), 1);
        assert!(transport.sent().is_empty());
        assert_eq!(ctx.stats.total_sent(), 0);
        assert_eq!(renderer.lines(Severity::Muted), vec!["Skipping message from alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_is_reported_not_counted() {
        let completer = StubCompleter::replying("alice: hey");
        let (pipeline, ctx, renderer) = pipeline(Settings::default(), completer);
        let (session, transport) = connected_session(0, "10.0.0.1:8303");
        transport.fail_sends(true);

        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "alice: hello", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::SendFailed);
        assert_eq!(ctx.stats.total_sent(), 0);
        assert_eq!(renderer.lines(Severity::Error).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reply() {
        let completer = StubCompleter::replying("alice: hey");
        let (pipeline, ctx, _) = pipeline(Settings::default(), completer);
        let (session, transport): (_, Arc<FakeTransport>) = connected_session(0, "10.0.0.1:8303");

        let shutdown = ctx.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            shutdown.cancel();
        });
        let outcome = pipeline
            .on_inbound_chat(&session, chat("alice", "alice: hello", Scope::All))
            .await;
        assert_eq!(outcome, DispatchOutcome::Cancelled);
        assert!(transport.sent().is_empty());
    }
}
