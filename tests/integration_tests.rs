use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use teebot::generator::ResponseGenerator;
use teebot::transport::{EventSender, Identity};
use teebot::{
    AddressBook, BotContext, ChatCompletions, ConnectionState, Connector, DispatchPipeline,
    Endpoint, InboundChatEvent, LineConnector, PlainTextRenderer, Renderer, Result, Scope,
    SessionManager, Settings, Transport, TransportEvent,
};

fn quiet() -> Arc<dyn Renderer> {
    Arc::new(PlainTextRenderer::with_color(false))
}

fn fast_settings() -> Settings {
    Settings {
        response_delay_ms: 10,
        inter_send_delay_ms: 10,
        shutdown_grace_ms: 2_000,
        ..Settings::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Records everything said through it.
struct Recorder {
    events: EventSender,
    said: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

#[async_trait::async_trait]
impl Transport for Recorder {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.said.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingConnector {
    opened: Mutex<Vec<(Endpoint, Arc<Recorder>)>>,
}

impl Connector for RecordingConnector {
    fn open(&self, endpoint: &Endpoint, _: &Identity, events: EventSender) -> Arc<dyn Transport> {
        let recorder = Arc::new(Recorder {
            events,
            said: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        });
        self.opened
            .lock()
            .unwrap()
            .push((endpoint.clone(), Arc::clone(&recorder)));
        recorder
    }
}

async fn completion_backend(reply: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": reply}}]
        })))
        .mount(&server)
        .await;
    server
}

fn pipeline_for(ctx: &BotContext, server: &MockServer) -> Arc<DispatchPipeline> {
    let client = ChatCompletions::with_options(
        Some("test-key".to_string()),
        Some(format!("{}/v1/chat/completions", server.uri())),
        None,
    )
    .unwrap();
    let generator = ResponseGenerator::new(Arc::new(client), &ctx.settings);
    Arc::new(DispatchPipeline::new(ctx.clone(), generator))
}

#[tokio::test]
async fn malformed_entries_do_not_become_sessions() {
    let book = AddressBook::parse("127.0.0.1:8303\nbad::entry\nexample.com:8303\n");
    assert_eq!(book.len(), 2);
    assert_eq!(book.rejected().len(), 1);

    let server = completion_backend("unused").await;
    let ctx = BotContext::new(fast_settings(), quiet());
    let connector = RecordingConnector::default();
    let manager = SessionManager::start(
        book.into_endpoints(),
        ctx.clone(),
        &connector,
        pipeline_for(&ctx, &server),
    )
    .unwrap();

    assert_eq!(manager.sessions().len(), 2);
    eventually(|| manager.connected_count() == 2).await;
    let opened = connector.opened.lock().unwrap();
    assert_eq!(opened[0].0.to_string(), "127.0.0.1:8303");
    assert_eq!(opened[1].0.to_string(), "example.com:8303");
    assert_eq!(opened[0].1.said.lock().unwrap()[0], "Hi! I'm here to chat.");
    assert_eq!(opened[1].1.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn chat_is_answered_through_the_backend() {
    let server = completion_backend("alice: hello,\nfriend").await;
    let ctx = BotContext::new(fast_settings(), quiet());
    let connector = RecordingConnector::default();
    let manager = SessionManager::start(
        vec!["10.1.1.1:8303".parse::<Endpoint>().unwrap()],
        ctx.clone(),
        &connector,
        pipeline_for(&ctx, &server),
    )
    .unwrap();
    eventually(|| manager.connected_count() == 1).await;

    let recorder = Arc::clone(&connector.opened.lock().unwrap()[0].1);
    let _ = recorder.events.send(TransportEvent::Message(InboundChatEvent::new(
        "alice",
        "alice: hello there",
        Scope::All,
    )));
    let _ = recorder.events.send(TransportEvent::Message(InboundChatEvent::new(
        "SERVER",
        "SERVER: Player joined",
        Scope::All,
    )));
    eventually(|| recorder.said.lock().unwrap().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        *recorder.said.lock().unwrap(),
        vec!["Hi! I'm here to chat.", "alice: hello, friend"]
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(manager.snapshot().total_sent, 1);
}

#[tokio::test]
async fn backend_failure_sends_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "slow down"}
        })))
        .mount(&server)
        .await;
    let ctx = BotContext::new(fast_settings(), quiet());
    let connector = RecordingConnector::default();
    let manager = SessionManager::start(
        vec!["10.1.1.1:8303".parse::<Endpoint>().unwrap()],
        ctx.clone(),
        &connector,
        pipeline_for(&ctx, &server),
    )
    .unwrap();
    eventually(|| manager.connected_count() == 1).await;

    let recorder = Arc::clone(&connector.opened.lock().unwrap()[0].1);
    let _ = recorder.events.send(TransportEvent::Message(InboundChatEvent::new(
        "bob",
        "bob: are you a bot?",
        Scope::Team,
    )));
    eventually(|| recorder.said.lock().unwrap().len() == 2).await;
    assert_eq!(
        recorder.said.lock().unwrap()[1],
        "bob: I'm rate limited or something went wrong"
    );
}

#[tokio::test]
async fn broadcast_reaches_every_connected_server() {
    let server = completion_backend("unused").await;
    let ctx = BotContext::new(fast_settings(), quiet());
    let connector = RecordingConnector::default();
    let manager = SessionManager::start(
        vec![
            "10.1.1.1:8303".parse::<Endpoint>().unwrap(),
            "10.1.1.2:8303".parse::<Endpoint>().unwrap(),
            "10.1.1.3:8303".parse::<Endpoint>().unwrap(),
        ],
        ctx.clone(),
        &connector,
        pipeline_for(&ctx, &server),
    )
    .unwrap();
    eventually(|| manager.connected_count() == 3).await;

    let report = manager.broadcast("server restart in 5 minutes").await;
    assert_eq!(report.delivered, 3);
    assert!(report.failures.is_empty());
    for (_, recorder) in connector.opened.lock().unwrap().iter() {
        assert_eq!(
            recorder.said.lock().unwrap().last().map(String::as_str),
            Some("server restart in 5 minutes")
        );
    }
}

#[tokio::test]
async fn line_relay_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (replied_tx, replied_rx) = oneshot::channel();

    let relay = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();

        seen.push(lines.next_line().await.unwrap().unwrap());
        write.write_all(b"{\"op\":\"ready\"}\n").await.unwrap();
        seen.push(lines.next_line().await.unwrap().unwrap());
        write
            .write_all(
                b"{\"op\":\"chat\",\"sender\":\"alice\",\"text\":\"alice: hello there\",\"team\":0}\n",
            )
            .await
            .unwrap();
        seen.push(lines.next_line().await.unwrap().unwrap());
        let _ = replied_tx.send(());
        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line);
        }
        seen
    });

    let server = completion_backend("alice: hi!").await;
    let ctx = BotContext::new(fast_settings(), quiet());
    let manager = SessionManager::start(
        vec![Endpoint::new("127.0.0.1", port).unwrap()],
        ctx.clone(),
        &LineConnector::new(),
        pipeline_for(&ctx, &server),
    )
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), replied_rx)
        .await
        .unwrap()
        .unwrap();
    let report = manager.shutdown_all().await;
    assert_eq!(report.sessions, 1);
    assert_eq!(report.disconnected, 1);
    assert_eq!(manager.sessions()[0].state(), ConnectionState::Disconnected);

    let seen = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        seen,
        vec![
            r#"{"op":"hello","name":"TeeAI","clan":"[BOT]"}"#.to_string(),
            r#"{"op":"say","text":"Hi! I'm here to chat."}"#.to_string(),
            r#"{"op":"say","text":"alice: hi!"}"#.to_string(),
            r#"{"op":"say","text":"Goodbye!"}"#.to_string(),
            r#"{"op":"bye"}"#.to_string(),
        ]
    );
}
