use std::collections::VecDeque;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;

use tether_proto::{ClientFrame, ServerFrame};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::details::SessionDetails;
use crate::endpoint::{Endpoint, SessionId};
use crate::error::SessionError;
use crate::flow::FlowSignal;
use crate::health::{HealthProbe, ReqwestHealthProbe};
use crate::queue::{BoundedQueue, OverflowPolicy, Pushed};
use crate::reconnect::{ReconnectPolicy, Supervisor};
use crate::transport::{Connector, TransportError, TransportEvent, TransportLink, WebSocketConnector};

const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_OUTBOUND_CAPACITY: usize = 4096;
const DEFAULT_INBOUND_CAPACITY: usize = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Destroyed,
}

impl SessionState {
    pub fn is_destroyed(self) -> bool {
        matches!(self, SessionState::Destroyed)
    }
}

/// Caller-facing view of [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl From<SessionState> for SessionStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Connecting => SessionStatus::Connecting,
            SessionState::Connected => SessionStatus::Connected,
            SessionState::Disconnected | SessionState::Destroyed => SessionStatus::Disconnected,
        }
    }
}

/// Latest published state plus the error that last took the session down.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub failure: Option<Arc<SessionError>>,
}

/// Receives terminal output for one session.
pub trait SessionConsumer: Send {
    fn on_data(&mut self, chunk: &str);

    /// The remote process exited. Called at most once.
    fn on_close(&mut self) {}
}

impl<F> SessionConsumer for F
where
    F: FnMut(&str) + Send,
{
    fn on_data(&mut self, chunk: &str) {
        self(chunk)
    }
}

/// Owner of terminal identities, told when a terminal is gone for good.
pub trait TerminalRegistry: Send + Sync {
    fn remove_terminal(&self, id: SessionId);
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on the wait for the host's auth ack.
    pub auth_timeout: Duration,
    /// Silence on a connected link longer than this counts as a lost transport.
    pub keepalive_timeout: Option<Duration>,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            keepalive_timeout: Some(DEFAULT_KEEPALIVE_TIMEOUT),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn Connector>,
    pub probe: Arc<dyn HealthProbe>,
    pub registry: Arc<dyn TerminalRegistry>,
}

impl SessionDeps {
    /// WebSocket transport and HTTP health checks.
    pub fn websocket(registry: Arc<dyn TerminalRegistry>) -> Result<Self, SessionError> {
        let probe = ReqwestHealthProbe::new()
            .map_err(|err| SessionError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            connector: Arc::new(WebSocketConnector::new()),
            probe: Arc::new(probe),
            registry,
        })
    }
}

enum Command {
    Send(ClientFrame),
    Pause,
    Resume,
    /// Render backpressure; only affects what the host is told.
    Throttle(bool),
    Destroy,
    Attach(Box<dyn SessionConsumer>),
    Detach,
}

/// Cheap, cloneable front of a running session.
///
/// Every operation is accepted in every state. Until the session is
/// connected, frames wait in the outbound queue; once it is destroyed they
/// are dropped.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Starts the session task on the current tokio runtime and begins
    /// connecting immediately.
    pub fn spawn(
        endpoint: Endpoint,
        details: SessionDetails,
        options: SessionOptions,
        deps: SessionDeps,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            state: SessionState::Connecting,
            failure: None,
        });
        let id = endpoint.session;
        let driver = SessionDriver {
            outbound: BoundedQueue::new(options.outbound_capacity, OverflowPolicy::RejectNewest),
            inbound: BoundedQueue::new(options.inbound_capacity, OverflowPolicy::DropOldest),
            endpoint,
            details,
            options,
            deps,
            commands: command_rx,
            snapshot: snapshot_tx,
            state: SessionState::Connecting,
            link: None,
            pending: None,
            auth_deadline: None,
            keepalive_deadline: None,
            consumer: None,
            paused: false,
            throttled: false,
            host_paused: false,
            registry_notified: false,
        };
        tokio::spawn(driver.run());
        SessionHandle {
            id,
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn write(&self, data: impl Into<String>) {
        self.submit(Command::Send(ClientFrame::Write(data.into())));
    }

    pub fn resize(&self, rows: u16, cols: u16) {
        self.submit(Command::Send(ClientFrame::Resize { rows, cols }));
    }

    /// Asks the host to stop streaming and holds back local delivery.
    pub fn pause(&self) {
        self.submit(Command::Pause);
    }

    pub fn resume(&self) {
        self.submit(Command::Resume);
    }

    pub fn destroy(&self) {
        self.submit(Command::Destroy);
    }

    /// Render backpressure for this session. The signal holds the session
    /// weakly, so a consumer carrying it does not keep the session alive.
    pub fn flow_signal(&self) -> Arc<dyn FlowSignal> {
        Arc::new(SessionFlow {
            id: self.id,
            commands: self.commands.downgrade(),
        })
    }

    /// Registers the output consumer, replacing any previous one. Buffered
    /// chunks are handed over first.
    pub fn attach(&self, consumer: impl SessionConsumer + 'static) {
        self.submit(Command::Attach(Box::new(consumer)));
    }

    pub fn detach(&self) {
        self.submit(Command::Detach);
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.state().into()
    }

    pub fn failure(&self) -> Option<Arc<SessionError>> {
        self.snapshot.borrow().failure.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Waits until the session reaches `target`. Fails with
    /// [`SessionError::Destroyed`] if it is destroyed first.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<(), SessionError> {
        let mut snapshot = self.snapshot.clone();
        let reached = snapshot
            .wait_for(|snap| snap.state == target || snap.state.is_destroyed())
            .await
            .map(|snap| snap.state == target)
            .unwrap_or(target.is_destroyed());
        if reached {
            Ok(())
        } else {
            Err(SessionError::Destroyed)
        }
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!(target: "tether::session", session = %self.id, "session gone; command dropped");
        }
    }
}

struct SessionFlow {
    id: SessionId,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl SessionFlow {
    fn throttle(&self, on: bool) {
        let sent = self
            .commands
            .upgrade()
            .map(|commands| commands.send(Command::Throttle(on)).is_ok())
            .unwrap_or(false);
        if !sent {
            trace!(target: "tether::session", session = %self.id, "session gone; flow signal dropped");
        }
    }
}

impl FlowSignal for SessionFlow {
    fn pause_remote(&self) {
        self.throttle(true);
    }

    fn resume_remote(&self) {
        self.throttle(false);
    }
}

#[derive(Debug, Clone, Copy)]
enum LinkPhase {
    Initial,
    Recovery,
}

impl LinkPhase {
    fn as_str(self) -> &'static str {
        match self {
            LinkPhase::Initial => "initial",
            LinkPhase::Recovery => "recovery",
        }
    }
}

/// A transport being opened off the session task. Dropping it cancels the work.
struct PendingLink {
    phase: LinkPhase,
    task: JoinHandle<Result<TransportLink, SessionError>>,
}

impl PendingLink {
    fn spawn<F>(phase: LinkPhase, work: F) -> Self
    where
        F: Future<Output = Result<TransportLink, SessionError>> + Send + 'static,
    {
        Self {
            phase,
            task: tokio::spawn(work),
        }
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Event {
    Command(Option<Command>),
    Link(TransportEvent),
    Opened(LinkPhase, Result<TransportLink, SessionError>),
    AuthExpired,
    KeepaliveLapsed,
}

struct SessionDriver {
    endpoint: Endpoint,
    details: SessionDetails,
    options: SessionOptions,
    deps: SessionDeps,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<SessionSnapshot>,
    state: SessionState,
    link: Option<TransportLink>,
    pending: Option<PendingLink>,
    auth_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    outbound: BoundedQueue<ClientFrame>,
    inbound: BoundedQueue<String>,
    consumer: Option<Box<dyn SessionConsumer>>,
    /// Pause requested by the caller. Gates local delivery.
    paused: bool,
    /// Pause requested by the renderer. Only reaches the host.
    throttled: bool,
    /// Pause state as last sent to the host on the current link.
    host_paused: bool,
    registry_notified: bool,
}

impl SessionDriver {
    async fn run(mut self) {
        let connector = self.deps.connector.clone();
        let endpoint = self.endpoint.clone();
        self.pending = Some(PendingLink::spawn(LinkPhase::Initial, async move {
            connector.connect(&endpoint).await.map_err(SessionError::from)
        }));

        while !self.state.is_destroyed() {
            let event = self.next_event().await;
            self.handle(event);
        }
        debug!(target: "tether::session", session = %self.endpoint.session, "session task finished");
    }

    async fn next_event(&mut self) -> Event {
        let link = self.link.as_mut();
        let pending = self.pending.as_mut();
        let auth_deadline = self.auth_deadline;
        let keepalive_deadline = match self.state {
            SessionState::Connected => self.keepalive_deadline,
            _ => None,
        };

        tokio::select! {
            command = self.commands.recv() => Event::Command(command),
            event = next_link_event(link) => Event::Link(event),
            opened = next_opened(pending) => opened,
            _ = sleep_until_some(auth_deadline) => Event::AuthExpired,
            _ = sleep_until_some(keepalive_deadline) => Event::KeepaliveLapsed,
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command(None) => {
                debug!(target: "tether::session", session = %self.endpoint.session, "all handles dropped");
                self.destroy();
            }
            Event::Command(Some(command)) => self.handle_command(command),
            Event::Link(event) => self.handle_link_event(event),
            Event::Opened(phase, outcome) => {
                self.pending = None;
                self.handle_opened(phase, outcome);
            }
            Event::AuthExpired => {
                let timeout = self.options.auth_timeout;
                self.fail(SessionError::AuthTimeout(timeout));
            }
            Event::KeepaliveLapsed => {
                warn!(
                    target: "tether::session",
                    session = %self.endpoint.session,
                    "no frames from host within keepalive window"
                );
                self.link_lost(Some("keepalive lapsed".into()));
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(frame) => self.dispatch(frame),
            Command::Pause => {
                self.paused = true;
                self.sync_host_flow();
            }
            Command::Resume => {
                self.paused = false;
                self.sync_host_flow();
                self.deliver_buffered();
            }
            Command::Throttle(on) => {
                self.throttled = on;
                self.sync_host_flow();
            }
            Command::Destroy => self.destroy(),
            Command::Attach(consumer) => {
                self.consumer = Some(consumer);
                self.deliver_buffered();
            }
            Command::Detach => self.consumer = None,
        }
    }

    fn handle_link_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => {
                if self.state == SessionState::Connected {
                    self.keepalive_deadline = self
                        .options
                        .keepalive_timeout
                        .map(|window| Instant::now() + window);
                }
                match ServerFrame::decode(&text) {
                    Ok(frame) => self.handle_frame(frame),
                    Err(err) => warn!(
                        target: "tether::session",
                        session = %self.endpoint.session,
                        error = %err,
                        "discarding malformed frame"
                    ),
                }
            }
            TransportEvent::Error(message) => {
                warn!(
                    target: "tether::session",
                    session = %self.endpoint.session,
                    error = %message,
                    "transport error"
                );
            }
            TransportEvent::Closed { reason } => self.link_lost(reason),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::AuthAccepted => {
                if self.state == SessionState::Connecting && self.auth_deadline.is_some() {
                    self.complete_handshake();
                } else {
                    debug!(target: "tether::session", session = %self.endpoint.session, "ignoring stray auth ack");
                }
            }
            ServerFrame::Data(chunk) => self.receive(chunk),
            ServerFrame::Exit => self.remote_exit(),
            ServerFrame::Keepalive => {
                trace!(target: "tether::session", session = %self.endpoint.session, "keepalive");
            }
        }
    }

    fn handle_opened(&mut self, phase: LinkPhase, outcome: Result<TransportLink, SessionError>) {
        match outcome {
            Ok(link) => self.begin_handshake(link, phase),
            Err(SessionError::Destroyed) => {}
            Err(err @ SessionError::SessionNotFound(_)) => {
                self.notify_registry();
                self.fail(err);
            }
            Err(err) => self.fail(err),
        }
    }

    fn begin_handshake(&mut self, link: TransportLink, phase: LinkPhase) {
        let auth = ClientFrame::Auth(self.details.auth_token().to_string());
        if link.send(auth.encode()).is_err() {
            self.fail(SessionError::HandshakeClosed);
            return;
        }
        debug!(
            target: "tether::session",
            session = %self.endpoint.session,
            phase = phase.as_str(),
            "transport open; awaiting auth ack"
        );
        self.link = Some(link);
        self.host_paused = false;
        self.auth_deadline = Some(Instant::now() + self.options.auth_timeout);
    }

    fn complete_handshake(&mut self) {
        self.auth_deadline = None;
        let Some(link) = self.link.as_ref() else {
            return;
        };
        if link.send(ClientFrame::Resume.encode()).is_err() {
            // the close event for this link is already on its way
            return;
        }
        self.host_paused = false;
        self.keepalive_deadline = self
            .options
            .keepalive_timeout
            .map(|window| Instant::now() + window);
        self.snapshot.send_modify(|snap| {
            snap.state = SessionState::Connected;
            snap.failure = None;
        });
        self.state = SessionState::Connected;
        info!(target: "tether::session", session = %self.endpoint.session, "session connected");

        if self.host_should_pause() && self.transmit(ClientFrame::Pause).is_err() {
            return;
        }

        let mut queued: VecDeque<ClientFrame> = self.outbound.drain().collect();
        if !queued.is_empty() {
            debug!(
                target: "tether::session",
                session = %self.endpoint.session,
                frames = queued.len(),
                "flushing queued frames"
            );
        }
        while let Some(frame) = queued.pop_front() {
            if let Err(frame) = self.transmit(frame) {
                self.outbound.push(frame);
                for rest in queued.drain(..) {
                    self.outbound.push(rest);
                }
                return;
            }
        }

        self.deliver_buffered();
    }

    fn host_should_pause(&self) -> bool {
        self.paused || self.throttled
    }

    /// Tells the host whether to stream. While not connected nothing is
    /// queued: the next handshake sends the state current at that point.
    fn sync_host_flow(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        let frame = if self.host_should_pause() {
            ClientFrame::Pause
        } else {
            ClientFrame::Resume
        };
        if self.transmit(frame).is_err() {
            debug!(target: "tether::session", session = %self.endpoint.session, "link gone; flow state restored on reconnect");
        }
    }

    /// Sends now when connected, otherwise queues.
    fn dispatch(&mut self, frame: ClientFrame) {
        let frame = if self.state == SessionState::Connected {
            match self.transmit(frame) {
                Ok(()) => return,
                Err(frame) => frame,
            }
        } else {
            frame
        };
        self.enqueue(frame);
    }

    fn enqueue(&mut self, frame: ClientFrame) {
        if self.state.is_destroyed() {
            return;
        }
        if self.outbound.push(frame) == Pushed::Rejected {
            warn!(
                target: "tether::session",
                session = %self.endpoint.session,
                dropped = self.outbound.stats().dropped,
                "outbound queue full; frame dropped"
            );
        }
    }

    /// Writes one frame to the live link. Pause and resume frames that would
    /// not change the host's state are skipped.
    fn transmit(&mut self, frame: ClientFrame) -> Result<(), ClientFrame> {
        let Some(link) = self.link.as_ref() else {
            return Err(frame);
        };
        match frame {
            ClientFrame::Pause if self.host_paused => return Ok(()),
            ClientFrame::Resume if !self.host_paused => return Ok(()),
            _ => {}
        }
        if link.send(frame.encode()).is_err() {
            return Err(frame);
        }
        match frame {
            ClientFrame::Pause => self.host_paused = true,
            ClientFrame::Resume => self.host_paused = false,
            _ => {}
        }
        trace!(target: "tether::session", session = %self.endpoint.session, frame = %frame, "sent");
        Ok(())
    }

    fn can_deliver(&self) -> bool {
        self.state == SessionState::Connected && !self.paused && self.consumer.is_some()
    }

    fn receive(&mut self, chunk: String) {
        if self.can_deliver() && self.inbound.is_empty() {
            if let Some(consumer) = self.consumer.as_mut() {
                consumer.on_data(&chunk);
            }
            return;
        }
        if self.inbound.push(chunk) == Pushed::Evicted {
            warn!(
                target: "tether::session",
                session = %self.endpoint.session,
                dropped = self.inbound.stats().dropped,
                "inbound queue full; oldest chunk dropped"
            );
        }
    }

    fn deliver_buffered(&mut self) {
        if !self.can_deliver() {
            return;
        }
        if let Some(consumer) = self.consumer.as_mut() {
            for chunk in self.inbound.drain() {
                consumer.on_data(&chunk);
            }
        }
    }

    fn link_lost(&mut self, reason: Option<String>) {
        self.link = None;
        self.auth_deadline = None;
        self.keepalive_deadline = None;
        match self.state {
            SessionState::Connected => {
                info!(
                    target: "tether::session",
                    session = %self.endpoint.session,
                    reason = reason.as_deref().unwrap_or(""),
                    "transport lost; reconnecting"
                );
                self.set_state(SessionState::Disconnected);
                self.start_recovery();
            }
            SessionState::Connecting => self.fail(SessionError::HandshakeClosed),
            SessionState::Disconnected | SessionState::Destroyed => {}
        }
    }

    fn start_recovery(&mut self) {
        self.set_state(SessionState::Connecting);
        let supervisor = Supervisor {
            endpoint: self.endpoint.clone(),
            policy: self.options.reconnect,
            probe: self.deps.probe.clone(),
            connector: self.deps.connector.clone(),
            liveness: self.snapshot.subscribe(),
        };
        self.pending = Some(PendingLink::spawn(LinkPhase::Recovery, supervisor.run()));
    }

    fn remote_exit(&mut self) {
        info!(target: "tether::session", session = %self.endpoint.session, "remote process exited");
        self.release();
        self.set_state(SessionState::Destroyed);
        if let Some(mut consumer) = self.consumer.take() {
            for chunk in self.inbound.drain() {
                consumer.on_data(&chunk);
            }
            consumer.on_close();
        }
        self.inbound.clear();
        self.notify_registry();
    }

    fn destroy(&mut self) {
        if let Some(link) = self.link.take() {
            if link.send(ClientFrame::Close.encode()).is_err() {
                debug!(target: "tether::session", session = %self.endpoint.session, "link already closed");
            }
        }
        self.release();
        self.set_state(SessionState::Destroyed);
        self.consumer = None;
        self.inbound.clear();
        info!(target: "tether::session", session = %self.endpoint.session, "session destroyed");
    }

    fn fail(&mut self, err: SessionError) {
        warn!(
            target: "tether::session",
            session = %self.endpoint.session,
            error = %err,
            "session disconnected"
        );
        self.release();
        self.state = SessionState::Disconnected;
        let failure = Arc::new(err);
        self.snapshot.send_modify(|snap| {
            snap.state = SessionState::Disconnected;
            snap.failure = Some(failure);
        });
    }

    /// Drops the link and any in-flight open, and clears outbound state.
    fn release(&mut self) {
        self.link = None;
        self.pending = None;
        self.auth_deadline = None;
        self.keepalive_deadline = None;
        if self.state.is_destroyed() {
            self.outbound.clear();
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        if state.is_destroyed() {
            self.outbound.clear();
        }
        self.snapshot.send_modify(|snap| snap.state = state);
    }

    fn notify_registry(&mut self) {
        if self.registry_notified {
            return;
        }
        self.registry_notified = true;
        self.deps.registry.remove_terminal(self.endpoint.session);
    }
}

async fn next_link_event(link: Option<&mut TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn next_opened(pending_link: Option<&mut PendingLink>) -> Event {
    match pending_link {
        Some(pending_link) => {
            let outcome = match (&mut pending_link.task).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SessionError::Transport(TransportError::Closed)),
            };
            Event::Opened(pending_link.phase, outcome)
        }
        None => pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
