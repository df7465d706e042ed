//! Session lifecycle.
//!
//! The [`SessionManager`] owns one [`Session`] per endpoint for the life of the
//! process.  Each session is a small state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --Connected--> Connected
//!       ^                                                   |
//!       +------------------- Disconnected ------------------+
//! ```
//!
//! Every `Disconnected` event counts against the session's reconnect budget and,
//! while budget remains, schedules another connect after `base * count`.  A
//! successful connect resets the count.  Once the budget is spent the session is
//! retired: it stays in the roster for reporting but is never connected again
//! and is skipped by broadcasts.
//!
//! Failures of `connect()` itself are logged and not retried; only a
//! `Disconnected` event drives a reconnect.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::address::Endpoint;
use crate::broadcast::{BroadcastCoordinator, BroadcastReport};
use crate::context::BotContext;
use crate::dispatch::DispatchPipeline;
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_CONNECTS, SESSION_DISCONNECTS, SESSION_ERRORS, SESSION_EXHAUSTED,
    SESSION_RECONNECTS_SCHEDULED,
};
use crate::stats::{StatsSnapshot, resident_memory_bytes};
use crate::transport::{Connector, Transport, TransportEvent};

/// Position of a session in the roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(usize);

impl SessionId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// The roster index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// `connect()` has been issued.
    Connecting,
    /// The server accepted us.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// What the manager should do after a disconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReconnectDecision {
    /// Try again; this is the `attempt`-th reconnect.
    Schedule { attempt: u32 },
    /// The budget just ran out.
    Retire { disconnects: u32 },
    /// The session was retired earlier.
    Retired,
}

/// Mutable state of one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Disconnects since the last successful connect.
    pub reconnect_count: u32,
    /// Set once the reconnect budget is exhausted; never cleared.
    pub retired: bool,
}

impl SessionStatus {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_count: 0,
            retired: false,
        }
    }

    /// Moves to `Connecting` unless the session is retired or already connected.
    pub(crate) fn begin_connect(&mut self) -> bool {
        if self.retired || self.state == ConnectionState::Connected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub(crate) fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_count = 0;
    }

    pub(crate) fn on_disconnected(&mut self, max_attempts: u32) -> ReconnectDecision {
        self.state = ConnectionState::Disconnected;
        self.reconnect_count = self.reconnect_count.saturating_add(1);
        if self.retired {
            ReconnectDecision::Retired
        } else if self.reconnect_count <= max_attempts {
            ReconnectDecision::Schedule {
                attempt: self.reconnect_count,
            }
        } else {
            self.retired = true;
            ReconnectDecision::Retire {
                disconnects: self.reconnect_count,
            }
        }
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

/// One managed connection to one game server.
pub struct Session {
    id: SessionId,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    status: Mutex<SessionStatus>,
}

impl Session {
    pub(crate) fn new(id: SessionId, endpoint: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            endpoint,
            transport,
            status: Mutex::new(SessionStatus::new()),
        }
    }

    /// Roster position.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The server this session talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// A copy of the current status.
    pub fn status(&self) -> SessionStatus {
        self.update(|status| status.clone())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.update(|status| status.state)
    }

    /// True while connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True when a broadcast should include this session.
    pub fn is_broadcast_target(&self) -> bool {
        self.update(|status| status.state == ConnectionState::Connected && !status.retired)
    }

    /// Say `text` on this server.
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::not_connected(&self.endpoint));
        }
        self.transport.send(text).await
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionStatus) -> R) -> R {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut status)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("status", &self.status())
            .finish()
    }
}

/// The fixed, registration-ordered list of sessions.
pub type Roster = Arc<[Arc<Session>]>;

///////////////////////////////////////// ReconnectQueue /////////////////////////////////////////

/// Timer queue of pending reconnects, keyed by session.
///
/// Scheduling a session that is already pending moves its deadline.  Due ids
/// come out of the receiver returned by [`ReconnectQueue::spawn`].  Cancelling
/// the shutdown token drops everything still pending.
pub(crate) struct ReconnectQueue {
    commands: mpsc::UnboundedSender<(SessionId, Duration)>,
}

impl ReconnectQueue {
    pub(crate) fn spawn(
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<SessionId>, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_reconnect_queue(command_rx, due_tx, shutdown));
        (Self { commands }, due_rx, task)
    }

    /// Returns false when the queue has stopped.
    pub(crate) fn schedule(&self, id: SessionId, delay: Duration) -> bool {
        self.commands.send((id, delay)).is_ok()
    }
}

async fn run_reconnect_queue(
    mut commands: mpsc::UnboundedReceiver<(SessionId, Duration)>,
    due: mpsc::UnboundedSender<SessionId>,
    shutdown: CancellationToken,
) {
    let mut queue: DelayQueue<SessionId> = DelayQueue::new();
    let mut keys: HashMap<SessionId, delay_queue::Key> = HashMap::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                queue.clear();
                break;
            }
            command = commands.recv() => {
                let Some((id, delay)) = command else {
                    break;
                };
                match keys.get(&id) {
                    Some(key) => queue.reset(key, delay),
                    None => {
                        let key = queue.insert(id, delay);
                        keys.insert(id, key);
                    }
                }
            }
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let id = expired.into_inner();
                keys.remove(&id);
                if due.send(id).is_err() {
                    break;
                }
            }
        }
    }
}

///////////////////////////////////////// SessionManager /////////////////////////////////////////

/// Outcome of [`SessionManager::shutdown_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that were connected when shutdown began.
    pub sessions: usize,
    /// Sessions that said goodbye and disconnected cleanly.
    pub disconnected: usize,
    /// Sessions whose disconnect failed.
    pub failed: usize,
    /// True when in-flight event handling had to be abandoned.
    pub abandoned_work: bool,
    /// True when the farewell phase hit the grace timeout.
    pub timed_out: bool,
}

struct Inner {
    roster: Roster,
    ctx: BotContext,
    pipeline: Arc<DispatchPipeline>,
    reconnects: ReconnectQueue,
}

impl Inner {
    async fn connect(&self, session: &Session) {
        if self.ctx.is_shutting_down() {
            return;
        }
        if !session.update(SessionStatus::begin_connect) {
            tracing::debug!(endpoint = %session.endpoint(), "session retired or already connected");
            return;
        }
        self.ctx
            .renderer
            .print_info(&format!("Connecting to {}...", session.endpoint()));
        let transport = session.transport();
        let result = tokio::select! {
            biased;
            _ = self.ctx.shutdown.cancelled() => {
                tracing::debug!(endpoint = %session.endpoint(), "connect abandoned for shutdown");
                session.update(SessionStatus::mark_disconnected);
                return;
            }
            result = transport.connect() => result,
        };
        match result {
            Ok(()) if self.ctx.is_shutting_down() => {
                // The farewell phase skips sessions that never reported Connected.
                if let Err(err) = transport.disconnect().await {
                    tracing::debug!(endpoint = %session.endpoint(), %err, "late disconnect failed");
                }
                session.update(SessionStatus::mark_disconnected);
            }
            Ok(()) => {}
            Err(err) => {
                session.update(SessionStatus::mark_disconnected);
                self.on_error(session, &err);
            }
        }
    }

    async fn handle_event(&self, session: &Session, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(session).await,
            TransportEvent::Message(event) => {
                let outcome = self.pipeline.on_inbound_chat(session, event).await;
                tracing::trace!(endpoint = %session.endpoint(), ?outcome, "dispatched");
            }
            TransportEvent::Disconnected(reason) => self.on_disconnected(session, &reason),
            TransportEvent::Error(err) => self.on_error(session, &err),
        }
    }

    async fn on_connected(&self, session: &Session) {
        SESSION_CONNECTS.click();
        session.update(SessionStatus::on_connected);
        self.ctx
            .renderer
            .print_success(&format!("Connected to {}!", session.endpoint()));
        let greeting = &self.ctx.settings.greeting;
        if !greeting.is_empty()
            && let Err(err) = session.send(greeting).await
        {
            self.ctx.renderer.print_warn(&format!(
                "Could not greet {}: {err}",
                session.endpoint()
            ));
        }
    }

    fn on_disconnected(&self, session: &Session, reason: &str) {
        SESSION_DISCONNECTS.click();
        if self.ctx.is_shutting_down() {
            session.update(SessionStatus::mark_disconnected);
            return;
        }
        self.ctx.renderer.print_error(&format!(
            "Disconnected from {}: {reason}",
            session.endpoint()
        ));

        let max_attempts = self.ctx.settings.max_reconnect_attempts;
        match session.update(|status| status.on_disconnected(max_attempts)) {
            ReconnectDecision::Schedule { attempt } => {
                SESSION_RECONNECTS_SCHEDULED.click();
                let delay = self.ctx.settings.reconnect_delay(attempt);
                self.ctx.renderer.print_warn(&format!(
                    "Reconnect attempt {attempt}/{max_attempts} to {} in {:.1}s",
                    session.endpoint(),
                    delay.as_secs_f64()
                ));
                if !self.reconnects.schedule(session.id(), delay) {
                    tracing::debug!(endpoint = %session.endpoint(), "reconnect queue stopped");
                }
            }
            ReconnectDecision::Retire { disconnects } => {
                SESSION_EXHAUSTED.click();
                self.ctx.renderer.print_error(&format!(
                    "Giving up on {} after {disconnects} disconnects",
                    session.endpoint()
                ));
            }
            ReconnectDecision::Retired => {}
        }
    }

    fn on_error(&self, session: &Session, err: &Error) {
        SESSION_ERRORS.click();
        self.ctx
            .renderer
            .print_error(&format!("Error on {}: {err}", session.endpoint()));
    }
}

async fn drive_session(
    inner: Arc<Inner>,
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    inner.connect(&session).await;
    loop {
        let event = tokio::select! {
            biased;
            _ = inner.ctx.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        inner.handle_event(&session, event).await;
    }
}

/// Runs due reconnects concurrently.  Every connect stays in `connects` so
/// that this task only finishes once none is left in flight.
async fn reconnect_loop(inner: Arc<Inner>, mut due: mpsc::UnboundedReceiver<SessionId>) {
    let mut connects = JoinSet::new();
    loop {
        let id = tokio::select! {
            biased;
            _ = inner.ctx.shutdown.cancelled() => break,
            Some(joined) = connects.join_next(), if !connects.is_empty() => {
                if let Err(err) = joined {
                    tracing::warn!(%err, "reconnect task failed");
                }
                continue;
            }
            id = due.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };
        let Some(session) = inner.roster.get(id.index()).cloned() else {
            continue;
        };
        let inner = Arc::clone(&inner);
        connects.spawn(async move {
            inner.connect(&session).await;
        });
    }
    // Each connect returns promptly once the shutdown token is cancelled.
    while connects.join_next().await.is_some() {}
}

/// Owns every session and the tasks that drive them.
pub struct SessionManager {
    inner: Arc<Inner>,
    coordinator: BroadcastCoordinator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Creates one session per distinct endpoint and starts connecting all of them.
    ///
    /// Must be called from within a tokio runtime.  Returns a configuration
    /// error when `endpoints` is empty.
    pub fn start(
        endpoints: impl IntoIterator<Item = Endpoint>,
        ctx: BotContext,
        connector: &dyn Connector,
        pipeline: Arc<DispatchPipeline>,
    ) -> Result<Self> {
        let identity = ctx.settings.identity();
        let mut seen = HashSet::new();
        let mut sessions = Vec::new();
        let mut receivers = Vec::new();
        for endpoint in endpoints {
            if !seen.insert(endpoint.clone()) {
                tracing::debug!(endpoint = %endpoint, "skipping duplicate endpoint");
                continue;
            }
            let (events, receiver) = mpsc::unbounded_channel();
            let transport = connector.open(&endpoint, &identity, events);
            sessions.push(Arc::new(Session::new(
                SessionId(sessions.len()),
                endpoint,
                transport,
            )));
            receivers.push(receiver);
        }
        if sessions.is_empty() {
            return Err(Error::configuration("no endpoints to connect to", None));
        }

        let roster: Roster = sessions.into();
        let (reconnects, due, queue_task) = ReconnectQueue::spawn(ctx.shutdown.clone());
        let inner = Arc::new(Inner {
            roster: Arc::clone(&roster),
            ctx: ctx.clone(),
            pipeline,
            reconnects,
        });

        let mut tasks = vec![queue_task];
        tasks.push(tokio::spawn(reconnect_loop(Arc::clone(&inner), due)));
        for (session, events) in roster.iter().cloned().zip(receivers) {
            tasks.push(tokio::spawn(drive_session(
                Arc::clone(&inner),
                session,
                events,
            )));
        }

        Ok(Self {
            coordinator: BroadcastCoordinator::new(roster, ctx),
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    /// Every session in registration order.
    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.inner.roster
    }

    /// Sessions currently connected.
    pub fn connected_count(&self) -> usize {
        self.inner
            .roster
            .iter()
            .filter(|session| session.is_connected())
            .count()
    }

    /// Sends `text` to every connected session.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        self.coordinator.broadcast(text).await
    }

    /// Current counters for `/stats` and the activity log.
    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = &self.inner.ctx.stats;
        StatsSnapshot {
            connected: self.connected_count(),
            sessions: self.inner.roster.len(),
            total_sent: stats.total_sent(),
            uptime: stats.uptime(),
            memory_bytes: resident_memory_bytes(),
        }
    }

    /// Stops processing events, drops pending reconnects, then says the
    /// farewell and disconnects every connected session.
    ///
    /// Each phase is bounded by the configured shutdown grace.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let ctx = &self.inner.ctx;
        let grace = ctx.settings.shutdown_grace();
        ctx.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let abandoned_work = tokio::time::timeout(grace, join_all(tasks)).await.is_err();
        if abandoned_work {
            for abort in aborts {
                abort.abort();
            }
        }

        let leaving: Vec<Arc<Session>> = self
            .inner
            .roster
            .iter()
            .filter(|session| session.is_connected())
            .cloned()
            .collect();
        let farewell = ctx.settings.farewell.as_str();
        let goodbyes = leaving.iter().map(|session| async move {
            if !farewell.is_empty()
                && let Err(err) = session.send(farewell).await
            {
                ctx.renderer.print_warn(&format!(
                    "Could not say goodbye on {}: {err}",
                    session.endpoint()
                ));
            }
            let result = session.transport().disconnect().await;
            session.update(SessionStatus::mark_disconnected);
            if let Err(err) = &result {
                ctx.renderer.print_error(&format!(
                    "Error leaving {}: {err}",
                    session.endpoint()
                ));
            }
            result
        });

        let mut report = ShutdownReport {
            sessions: leaving.len(),
            abandoned_work,
            ..ShutdownReport::default()
        };
        match tokio::time::timeout(grace, join_all(goodbyes)).await {
            Ok(results) => {
                report.failed = results.iter().filter(|result| result.is_err()).count();
                report.disconnected = results.len() - report.failed;
            }
            Err(_) => {
                report.timed_out = true;
                report.failed = leaving.len();
            }
        }
        report
    }
}
