//! In-memory fakes shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::address::Endpoint;
use crate::client::{Completer, CompletionRequest};
use crate::error::{Error, Result};
use crate::render::Renderer;
use crate::transport::{
    Connector, EventSender, Identity, InboundChatEvent, Scope, Transport, TransportEvent,
};

pub(crate) struct FakeTransport {
    pub endpoint: Endpoint,
    events: EventSender,
    sent: Mutex<Vec<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_sends: AtomicBool,
    fail_connect: AtomicBool,
    stall_connect: AtomicBool,
}

impl FakeTransport {
    pub fn new(endpoint: Endpoint, events: EventSender) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            events,
            sent: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            stall_connect: AtomicBool::new(false),
        })
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_chat(&self, sender: &str, raw_text: &str, scope: Scope) {
        self.emit(TransportEvent::Message(InboundChatEvent::new(
            sender, raw_text, scope,
        )));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes later `connect` calls hang until the caller gives up on them.
    pub fn stall_connect(&self, stall: bool) {
        self.stall_connect.store(stall, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::transport(&self.endpoint, "connection refused"));
        }
        if self.stall_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::transport(&self.endpoint, "send failed"));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    failing_sends: HashSet<String>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sends_on(mut self, endpoint: &str) -> Self {
        self.failing_sends.insert(endpoint.to_string());
        self
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub fn transport(&self, idx: usize) -> Arc<FakeTransport> {
        self.transports.lock().unwrap()[idx].clone()
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        endpoint: &Endpoint,
        _identity: &Identity,
        events: EventSender,
    ) -> Arc<dyn Transport> {
        let transport = FakeTransport::new(endpoint.clone(), events);
        if self.failing_sends.contains(&endpoint.to_string()) {
            transport.fail_sends(true);
        }
        self.transports.lock().unwrap().push(transport.clone());
        transport
    }
}

pub(crate) struct StubCompleter {
    result: Result<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl StubCompleter {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: Error) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Completer for StubCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.result.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Severity {
    Info,
    Success,
    Muted,
    Warn,
    Error,
    Chat,
}

#[derive(Default)]
pub(crate) struct RecordingRenderer {
    lines: Mutex<Vec<(Severity, String)>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, severity: Severity, line: &str) {
        self.lines.lock().unwrap().push((severity, line.to_string()));
    }

    pub fn lines(&self, severity: Severity) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn print_info(&self, info: &str) {
        self.record(Severity::Info, info);
    }

    fn print_success(&self, message: &str) {
        self.record(Severity::Success, message);
    }

    fn print_muted(&self, message: &str) {
        self.record(Severity::Muted, message);
    }

    fn print_warn(&self, warning: &str) {
        self.record(Severity::Warn, warning);
    }

    fn print_error(&self, error: &str) {
        self.record(Severity::Error, error);
    }

    fn print_chat(&self, endpoint: &Endpoint, event: &InboundChatEvent, message: &str) {
        self.record(
            Severity::Chat,
            &format!("[{endpoint}] {}: {message}", event.sender),
        );
    }
}

/// Lets spawned tasks run until they block again.
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// A session already in the connected state, backed by a fresh fake.
pub(crate) fn connected_session(
    index: usize,
    endpoint: &str,
) -> (Arc<crate::session::Session>, Arc<FakeTransport>) {
    let endpoint: Endpoint = endpoint.parse().unwrap();
    let (events, _) = tokio::sync::mpsc::unbounded_channel();
    let transport = FakeTransport::new(endpoint.clone(), events);
    let session = crate::session::Session::new(
        crate::session::SessionId::from_index(index),
        endpoint,
        transport.clone(),
    );
    session.update(crate::session::SessionStatus::on_connected);
    (Arc::new(session), transport)
}
