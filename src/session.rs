//! The duel session state machine.
//!
//! [`DuelSession`] is a thin handle that communicates with a background
//! session loop task via an unbounded MPSC channel. The loop owns the
//! channel transport, the gateway, and every piece of mutable session
//! state (roster, health, code buffers, question slots, notifications);
//! the handle reads only a small shared snapshot and requests mutation
//! by sending commands. Session output is emitted on a bounded channel
//! of [`SessionEvent`]s returned from [`DuelSession::start`].
//!
//! Inbound channel events are processed strictly in arrival order —
//! health and code state are last-write-wins on participant id, so
//! reordering would surface stale state. Gateway calls are awaited
//! inline by the loop: each handler runs to completion before the next
//! event is picked up.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("ws://localhost:5001/duel").await?;
//! let gateway = HttpGateway::new("http://localhost:5001");
//! let config = SessionConfig::creator("u1");
//! let (session, mut events) = DuelSession::start(transport, gateway, config);
//!
//! session.select_difficulty(Difficulty::Easy)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::GameOver(result) => { /* results view */ }
//!         SessionEvent::ReturnHome => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::challenge::{
    format_failure_report, format_success, unescape_template, ChallengeSlot,
};
use crate::code_sync::{CodeBuffers, DisplaySlot};
use crate::error::{DuelError, Result};
use crate::gateway::Gateway;
use crate::notify::{NotificationCenter, NotificationKind, DEFAULT_NOTIFY_TTL};
use crate::protocol::{
    AnsweredQuestionPayload, ClientEventMsg, Difficulty, GameResult, JoinGamePayload,
    LeaveGamePayload, OutboundCodePayload, ParticipantId, Problem, Role, ServerEvent, MAX_HEALTH,
};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay between an opponent's explicit departure and the
/// hand-off to the home view.
const DEFAULT_LEAVE_DELAY: Duration = Duration::from_secs(3);

/// Default delay between a local leave and the hand-off to the home
/// view, long enough for the leave event to flush.
const DEFAULT_LEAVE_FLUSH_DELAY: Duration = Duration::from_secs(1);

/// Substring of the create-room failure that marks a duplicate attempt.
/// The server rejects a second room for a participant already seated;
/// the first, indistinguishable attempt succeeded, so this failure is
/// swallowed rather than surfaced.
const ALREADY_IN_ROOM: &str = "already in a game room";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`DuelSession`].
///
/// Construct with [`SessionConfig::creator`] (provision a new room) or
/// [`SessionConfig::joiner`] (join an existing room by code). A
/// quick-match assignment that created a fresh room uses
/// [`SessionConfig::creator_in_room`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The local participant's server-issued id.
    pub user_id: ParticipantId,
    /// Room code to join, if already known.
    pub room_code: Option<String>,
    /// Whether the local participant provisions the room.
    pub creator: bool,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, routine events are dropped
    /// (with a warning logged) to avoid blocking the session loop.
    /// Terminal events (`GameOver`, `ReturnHome`, `Disconnected`) are
    /// always delivered. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown before the loop task is aborted.
    pub shutdown_timeout: Duration,
    /// Lifetime of a transient notification.
    pub notify_ttl: Duration,
    /// Delay between `player_left` and the home hand-off.
    pub leave_delay: Duration,
    /// Delay between a local leave and the home hand-off.
    pub leave_flush_delay: Duration,
}

impl SessionConfig {
    fn new(user_id: impl Into<ParticipantId>, room_code: Option<String>, creator: bool) -> Self {
        Self {
            user_id: user_id.into(),
            room_code,
            creator,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            notify_ttl: DEFAULT_NOTIFY_TTL,
            leave_delay: DEFAULT_LEAVE_DELAY,
            leave_flush_delay: DEFAULT_LEAVE_FLUSH_DELAY,
        }
    }

    /// The local participant provisions a new room on start.
    pub fn creator(user_id: impl Into<ParticipantId>) -> Self {
        Self::new(user_id, None, true)
    }

    /// The local participant joins an existing room by code.
    pub fn joiner(user_id: impl Into<ParticipantId>, room_code: impl Into<String>) -> Self {
        Self::new(user_id, Some(room_code.into()), false)
    }

    /// Quick-match assignment: a fresh room was already provisioned for
    /// this participant, so no create call is needed.
    pub fn creator_in_room(
        user_id: impl Into<ParticipantId>,
        room_code: impl Into<String>,
    ) -> Self {
        Self::new(user_id, Some(room_code.into()), true)
    }

    /// Set the capacity of the bounded event channel.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the lifetime of transient notifications.
    #[must_use]
    pub fn with_notify_ttl(mut self, ttl: Duration) -> Self {
        self.notify_ttl = ttl;
        self
    }

    /// Set the delay between `player_left` and the home hand-off.
    #[must_use]
    pub fn with_leave_delay(mut self, delay: Duration) -> Self {
        self.leave_delay = delay;
        self
    }

    /// Set the delay between a local leave and the home hand-off.
    #[must_use]
    pub fn with_leave_flush_delay(mut self, delay: Duration) -> Self {
        self.leave_flush_delay = delay;
        self
    }
}

// ── Observable state ────────────────────────────────────────────────

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Connecting,
    WaitingForOpponent,
    Active,
    /// Attached as a read-only observer of a full room.
    SpectatorActive,
    Terminated,
}

/// Status of the underlying channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

/// Events emitted by the session loop toward the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The channel connection status changed.
    ConnectionChanged(ConnectionStatus),
    /// The session advanced to a new phase.
    PhaseChanged(SessionPhase),
    /// A room code was assigned (creator flow).
    RoomAssigned { room_code: String },
    /// Roster and display names were captured or changed.
    RosterUpdated {
        players: Vec<ParticipantId>,
        usernames: HashMap<ParticipantId, String>,
    },
    /// Authoritative health value for one participant.
    HealthChanged { user_id: ParticipantId, health: u32 },
    /// A remote participant's buffer mirror changed.
    CodeMirrorUpdated {
        user_id: ParticipantId,
        slot: DisplaySlot,
        code: String,
    },
    /// The local buffer was replaced with a question template.
    LocalBufferReplaced { code: String },
    /// A participant received a new active question.
    QuestionAssigned {
        user_id: ParticipantId,
        question: Problem,
    },
    /// A participant's active question was resolved or abandoned.
    QuestionCleared { user_id: ParticipantId },
    /// A transient notification was raised.
    Notification {
        kind: NotificationKind,
        text: String,
    },
    /// A transient notification expired.
    NotificationExpired { kind: NotificationKind },
    /// Terminal match result for the external results view.
    GameOver(GameResult),
    /// Hand control back to the external home view.
    ReturnHome,
    /// The session loop has stopped; no further events will arrive.
    Disconnected { reason: Option<String> },
}

// ── Commands ────────────────────────────────────────────────────────

/// User intents sent from the handle to the session loop.
#[derive(Debug)]
enum SessionCommand {
    EditCode(String),
    SelectDifficulty(Difficulty),
    Submit,
    Skip,
    Leave,
}

// ── Shared state ────────────────────────────────────────────────────

/// Snapshot state shared between the handle and the session loop.
///
/// The loop is the only writer. Long-lived readers (including the
/// loop's own event handlers) always observe the most recently applied
/// transition because they go through this container rather than
/// captured copies.
struct SharedState {
    connected: AtomicBool,
    hard_mode: AtomicBool,
    phase: Mutex<SessionPhase>,
    role: Mutex<Role>,
    room_code: Mutex<Option<String>>,
}

impl SharedState {
    fn new(initial_role: Role) -> Self {
        Self {
            connected: AtomicBool::new(true),
            hard_mode: AtomicBool::new(false),
            phase: Mutex::new(SessionPhase::Initializing),
            role: Mutex::new(initial_role),
            room_code: Mutex::new(None),
        }
    }
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to a running duel session.
///
/// Created via [`DuelSession::start`], which spawns the background
/// session loop and returns this handle together with the event
/// receiver. All methods queue a command and return immediately; the
/// loop applies them in order.
pub struct DuelSession {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    shared: Arc<SharedState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl DuelSession {
    /// Start the session loop and return a handle plus event receiver.
    ///
    /// The loop immediately initiates the join bootstrap: a creator
    /// without a room code provisions one through the gateway, then a
    /// `join_game` event is emitted over the channel.
    #[must_use = "the event receiver must be used to receive session events"]
    pub fn start(
        transport: impl Transport,
        gateway: impl Gateway,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let initial_role = if config.creator {
            Role::Creator
        } else {
            Role::Joiner
        };
        let shared = Arc::new(SharedState::new(initial_role));
        let shutdown_timeout = config.shutdown_timeout;

        let session_loop = SessionLoop::new(
            transport,
            gateway,
            event_tx,
            Arc::clone(&shared),
            config,
            initial_role,
        );
        let task = tokio::spawn(session_loop.run(cmd_rx, shutdown_rx));

        let session = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (session, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Apply a local edit. The buffer updates optimistically and the
    /// full content is propagated over the channel.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn edit_code(&self, code: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::EditCode(code.into()))
    }

    /// Fetch a problem of the given difficulty. Only valid with no
    /// question in flight or active; invalid requests are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn select_difficulty(&self, difficulty: Difficulty) -> Result<()> {
        self.send(SessionCommand::SelectDifficulty(difficulty))
    }

    /// Submit the current buffer against the active question.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn submit(&self) -> Result<()> {
        self.send(SessionCommand::Submit)
    }

    /// Abandon the active question without grading.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn skip(&self) -> Result<()> {
        self.send(SessionCommand::Skip)
    }

    /// Leave the room: emits `leave_game`, disconnects, and hands
    /// control home after the flush delay.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn leave(&self) -> Result<()> {
        self.send(SessionCommand::Leave)
    }

    /// Toggle the hard-mode modifier.
    ///
    /// The flag is read live at verification time: the value in effect
    /// when the server's correct-verdict arrives is the one stamped on
    /// the outbound `answered-question` event.
    pub fn set_hard_mode(&self, enabled: bool) {
        self.shared.hard_mode.store(enabled, Ordering::Release);
    }

    /// Shut down the session, closing the transport and stopping the
    /// loop task. The leave event is emitted if it has not been already.
    ///
    /// After this method returns, the event receiver will yield `None`
    /// once remaining events are drained.
    pub async fn shutdown(&mut self) {
        debug!("DuelSession: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout. If it doesn't exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` if the session loop is believed to be running.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Whether the hard-mode modifier is currently enabled.
    pub fn hard_mode_enabled(&self) -> bool {
        self.shared.hard_mode.load(Ordering::Acquire)
    }

    /// The current session phase.
    pub async fn phase(&self) -> SessionPhase {
        *self.shared.phase.lock().await
    }

    /// The local participant's role, as currently known.
    pub async fn role(&self) -> Role {
        *self.shared.role.lock().await
    }

    /// The current room code, once assigned.
    pub async fn current_room_code(&self) -> Option<String> {
        self.shared.room_code.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(DuelError::NotConnected);
        }
        self.cmd_tx.send(cmd).map_err(|_| DuelError::NotConnected)
    }
}

impl std::fmt::Debug for DuelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuelSession")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for DuelSession {
    fn drop(&mut self) {
        // `Drop` is synchronous so the graceful path (leave event +
        // transport close) cannot be driven here; aborting the task is
        // the only safe action. Callers that need the leave event to
        // flush must use `shutdown()`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Control-flow outcome of one handler invocation.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The background task that owns all mutable session state.
struct SessionLoop<T: Transport, G: Gateway> {
    transport: T,
    gateway: G,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SharedState>,

    user_id: ParticipantId,
    creator: bool,
    leave_delay: Duration,
    leave_flush_delay: Duration,

    phase: SessionPhase,
    role: Role,
    room_code: Option<String>,
    roster: Vec<ParticipantId>,
    usernames: HashMap<ParticipantId, String>,
    health: HashMap<ParticipantId, u32>,
    buffers: CodeBuffers,
    challenges: HashMap<ParticipantId, ChallengeSlot>,
    notifications: NotificationCenter,
    started_at: Option<String>,

    /// Request-deduplication keys held for the session lifetime.
    dedup_keys: HashSet<String>,
    /// The leave event is emitted exactly once, no matter why the
    /// session is torn down.
    left_sent: bool,
    /// Deadline for the pending home hand-off, if one is scheduled.
    pending_home: Option<Instant>,
}

impl<T: Transport, G: Gateway> SessionLoop<T, G> {
    fn new(
        transport: T,
        gateway: G,
        event_tx: mpsc::Sender<SessionEvent>,
        shared: Arc<SharedState>,
        config: SessionConfig,
        initial_role: Role,
    ) -> Self {
        Self {
            transport,
            gateway,
            event_tx,
            shared,
            user_id: config.user_id.clone(),
            creator: config.creator,
            leave_delay: config.leave_delay,
            leave_flush_delay: config.leave_flush_delay,
            phase: SessionPhase::Initializing,
            role: initial_role,
            room_code: config.room_code,
            roster: Vec::new(),
            usernames: HashMap::new(),
            health: HashMap::new(),
            buffers: CodeBuffers::new(config.user_id),
            challenges: HashMap::new(),
            notifications: NotificationCenter::new(config.notify_ttl),
            started_at: None,
            dedup_keys: HashSet::new(),
            left_sent: false,
            pending_home: None,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("session loop started");

        self.set_phase(SessionPhase::Connecting).await;
        self.emit(SessionEvent::ConnectionChanged(ConnectionStatus::Connecting));
        self.bootstrap_join().await;

        loop {
            let timer_deadline = self.next_deadline();

            tokio::select! {
                // Branch 1: user intent from the handle
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await == Flow::Stop {
                                break;
                            }
                        }
                        // Handle dropped without explicit shutdown.
                        None => {
                            debug!("command channel closed, shutting down session loop");
                            self.teardown(Some("session handle dropped".into())).await;
                            break;
                        }
                    }
                }

                // Branch 2: shutdown signal
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.teardown(Some("session shut down".into())).await;
                    break;
                }

                // Branch 3: inbound frame from the server
                incoming = self.transport.recv() => {
                    match incoming {
                        Some(Ok(text)) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    if self.handle_server_event(event).await == Flow::Stop {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!("failed to deserialize server event: {e} — raw: {text}");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!("transport receive error: {e}");
                            self.emit(SessionEvent::ConnectionChanged(ConnectionStatus::Errored));
                            self.notify(
                                NotificationKind::ConnectionWarning,
                                "Connection to the game server was lost",
                            );
                            self.teardown(Some(format!("transport receive error: {e}"))).await;
                            break;
                        }
                        // Transport closed cleanly.
                        None => {
                            debug!("transport closed by server");
                            self.emit(SessionEvent::ConnectionChanged(
                                ConnectionStatus::Disconnected,
                            ));
                            self.teardown(None).await;
                            break;
                        }
                    }
                }

                // Branch 4: earliest pending timer (notification expiry
                // or scheduled home hand-off)
                _ = sleep_until_opt(timer_deadline) => {
                    if self.on_timer().await == Flow::Stop {
                        break;
                    }
                }
            }
        }

        debug!("session loop exited");
    }

    // ── Bootstrap ───────────────────────────────────────────────────

    /// Provision a room if needed, then announce the join over the
    /// channel. Creator-without-code goes through the gateway first;
    /// everyone else joins immediately.
    async fn bootstrap_join(&mut self) {
        if self.room_code.is_none() && self.creator {
            self.create_room().await;
        }
        if let Some(code) = self.room_code.clone() {
            self.send_join(code).await;
        }
    }

    /// Call the create-room operation, guarded by a deduplication key
    /// held for the session lifetime so a duplicate trigger cannot
    /// provision a second room.
    async fn create_room(&mut self) {
        let key = format!("create_room:{}", self.user_id);
        if !self.dedup_keys.insert(key.clone()) {
            debug!("suppressing duplicate create_room attempt");
            return;
        }

        match self.gateway.create_room(&self.user_id).await {
            Ok(resp) => {
                self.assign_room_code(resp.room_code).await;
            }
            Err(DuelError::Api { message, .. }) if message.contains(ALREADY_IN_ROOM) => {
                // A prior, indistinguishable attempt already seated us.
                // Not a fault; the key stays armed.
                debug!("create_room: already in a game room, treating as success");
            }
            Err(e) => {
                // Re-arm so a later attempt may retry.
                self.dedup_keys.remove(&key);
                warn!("create_room failed: {e}");
                self.notify(NotificationKind::Error, format!("Could not create room: {e}"));
            }
        }
    }

    async fn assign_room_code(&mut self, code: String) {
        if self.room_code.is_some() {
            // Immutable once assigned.
            return;
        }
        self.room_code = Some(code.clone());
        *self.shared.room_code.lock().await = Some(code.clone());
        self.emit(SessionEvent::RoomAssigned { room_code: code });
    }

    async fn send_join(&mut self, room_code: String) {
        *self.shared.room_code.lock().await = Some(room_code.clone());
        let msg = ClientEventMsg::JoinGame(JoinGamePayload {
            room_code,
            user_id: self.user_id.clone(),
        });
        self.send_frame(msg).await;
    }

    // ── Inbound events ──────────────────────────────────────────────

    async fn handle_server_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::Connected(_) => {
                self.shared.connected.store(true, Ordering::Release);
                self.emit(SessionEvent::ConnectionChanged(ConnectionStatus::Connected));
                Flow::Continue
            }

            ServerEvent::WaitingForPlayer(payload) => {
                if let Some(code) = payload.room_code {
                    if self.room_code.is_none() {
                        self.assign_room_code(code).await;
                    }
                }
                match self.phase {
                    SessionPhase::Initializing | SessionPhase::Connecting => {
                        self.set_phase(SessionPhase::WaitingForOpponent).await;
                    }
                    // A stray waiting event mid-match carries no
                    // transition; only player_disconnected reopens the
                    // waiting state.
                    other => debug!(?other, "ignoring waiting_for_player in phase"),
                }
                Flow::Continue
            }

            ServerEvent::GameReady(payload) => {
                self.roster = payload.players.clone();
                self.usernames = payload.usernames.clone();
                self.buffers.set_roster(payload.players.clone());
                self.started_at = payload.started_at.clone();
                for (id, hp) in &payload.health {
                    self.health.insert(id.clone(), (*hp).min(MAX_HEALTH));
                }
                // A spectator whose room resumes stays a spectator.
                let next = if self.role == Role::Spectator {
                    SessionPhase::SpectatorActive
                } else {
                    SessionPhase::Active
                };
                self.set_phase(next).await;
                self.emit(SessionEvent::RosterUpdated {
                    players: payload.players,
                    usernames: payload.usernames,
                });
                let snapshot: Vec<(ParticipantId, u32)> = self
                    .health
                    .iter()
                    .map(|(id, hp)| (id.clone(), *hp))
                    .collect();
                for (user_id, health) in snapshot {
                    self.emit(SessionEvent::HealthChanged { user_id, health });
                }
                Flow::Continue
            }

            ServerEvent::JoinedAsSpectator(snapshot) => {
                // The event type decides the role; roster size cannot
                // distinguish a second player joining from a late
                // spectator attach.
                self.role = Role::Spectator;
                *self.shared.role.lock().await = Role::Spectator;
                if let Some(code) = snapshot.room_code.clone() {
                    if self.room_code.is_none() {
                        self.assign_room_code(code).await;
                    }
                }

                self.roster = snapshot.players.clone();
                self.usernames = snapshot.usernames.clone();
                self.started_at = snapshot.started_at.clone();
                self.buffers.enter_spectator_mode();
                self.buffers.set_roster(snapshot.players.clone());
                for (id, hp) in &snapshot.health {
                    self.health.insert(id.clone(), (*hp).min(MAX_HEALTH));
                }

                self.set_phase(SessionPhase::SpectatorActive).await;
                self.emit(SessionEvent::RosterUpdated {
                    players: snapshot.players.clone(),
                    usernames: snapshot.usernames.clone(),
                });
                let snapshot_health: Vec<(ParticipantId, u32)> = self
                    .health
                    .iter()
                    .map(|(id, hp)| (id.clone(), *hp))
                    .collect();
                for (user_id, health) in snapshot_health {
                    self.emit(SessionEvent::HealthChanged { user_id, health });
                }

                // Seed both mirrors and surface them at their seats.
                for (id, code) in snapshot.code.clone() {
                    self.buffers.seed_mirror(id.clone(), code.clone());
                    let slot = if snapshot.players.first() == Some(&id) {
                        DisplaySlot::Left
                    } else {
                        DisplaySlot::Right
                    };
                    self.emit(SessionEvent::CodeMirrorUpdated {
                        user_id: id,
                        slot,
                        code,
                    });
                }
                for (id, question) in snapshot.active_questions.clone() {
                    self.challenges
                        .entry(id.clone())
                        .or_default()
                        .install(question.clone());
                    self.emit(SessionEvent::QuestionAssigned {
                        user_id: id,
                        question,
                    });
                }
                Flow::Continue
            }

            ServerEvent::OpponentCodeUpdate(payload) => {
                let user_id = payload.user_id.clone();
                let code = payload.code.clone();
                if let Some(slot) = self.buffers.apply_remote(payload) {
                    self.emit(SessionEvent::CodeMirrorUpdated {
                        user_id,
                        slot,
                        code,
                    });
                }
                Flow::Continue
            }

            ServerEvent::UpdatePlayerHealth(payload) => {
                let health = payload.health.min(MAX_HEALTH);
                self.health.insert(payload.user_id.clone(), health);
                self.emit(SessionEvent::HealthChanged {
                    user_id: payload.user_id,
                    health,
                });
                Flow::Continue
            }

            ServerEvent::GameOver(result) => {
                self.set_phase(SessionPhase::Terminated).await;
                self.emit_terminal(SessionEvent::GameOver(*result)).await;
                self.teardown(Some("game over".into())).await;
                Flow::Stop
            }

            ServerEvent::PlayerSelectedQuestion(payload) => {
                if payload.user_id != self.user_id {
                    self.challenges
                        .entry(payload.user_id.clone())
                        .or_default()
                        .install(payload.question.clone());
                    self.emit(SessionEvent::QuestionAssigned {
                        user_id: payload.user_id,
                        question: payload.question,
                    });
                }
                Flow::Continue
            }

            ServerEvent::PlayerAnsweredQuestion(payload) => {
                if let Some(slot) = self.challenges.get_mut(&payload.user_id) {
                    if slot.clear().is_some() {
                        self.emit(SessionEvent::QuestionCleared {
                            user_id: payload.user_id,
                        });
                    }
                }
                Flow::Continue
            }

            ServerEvent::SolutionVerified(payload) => {
                self.on_solution_verified(payload).await;
                Flow::Continue
            }

            ServerEvent::PlayerLeft(_) => {
                self.notify(NotificationKind::Error, "Your opponent has left the game");
                self.set_phase(SessionPhase::Terminated).await;
                self.pending_home = Some(Instant::now() + self.leave_delay);
                Flow::Continue
            }

            ServerEvent::PlayerDisconnected(payload) => {
                // A drop, not a departure: the seat stays reserved, so
                // health and roster are retained.
                match payload.user_id {
                    Some(id) => self.buffers.clear_mirror(&id),
                    None => self.buffers.clear_remote_mirrors(),
                }
                if matches!(
                    self.phase,
                    SessionPhase::Active | SessionPhase::SpectatorActive
                ) {
                    self.set_phase(SessionPhase::WaitingForOpponent).await;
                }
                self.notify(
                    NotificationKind::ConnectionWarning,
                    "Opponent disconnected — waiting for them to return",
                );
                Flow::Continue
            }

            ServerEvent::Error(payload) => {
                self.notify(NotificationKind::Error, payload.message);
                Flow::Continue
            }
        }
    }

    /// The server verified a submission. When the verdict is a correct
    /// solution by the local participant, fire the `answered-question`
    /// event carrying the hard-mode flag as read *now* — the server
    /// applies the bonus-damage rule out of band.
    async fn on_solution_verified(&mut self, payload: crate::protocol::SolutionVerifiedPayload) {
        if payload.user_id != self.user_id || !payload.correct {
            return;
        }
        let Some(room_code) = self.room_code.clone() else {
            warn!("solution verified with no room code; dropping answered-question");
            return;
        };
        let question = payload.question.or_else(|| {
            self.challenges
                .get(&self.user_id)
                .and_then(|slot| slot.question().cloned())
        });
        let Some(question) = question else {
            warn!("solution verified with no active question; dropping answered-question");
            return;
        };

        let hard_mode_active = self.shared.hard_mode.load(Ordering::Acquire);
        let msg = ClientEventMsg::AnsweredQuestion(Box::new(AnsweredQuestionPayload {
            user_id: self.user_id.clone(),
            room_code,
            question,
            hard_mode_active,
            correct: true,
        }));
        self.send_frame(msg).await;
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: SessionCommand) -> Flow {
        // Spectators observe; the only command that still applies is Leave.
        if self.role == Role::Spectator && !matches!(cmd, SessionCommand::Leave) {
            debug!(?cmd, "ignoring player command in spectator mode");
            return Flow::Continue;
        }

        match cmd {
            SessionCommand::EditCode(code) => {
                self.buffers.local_edit(code.clone());
                if let Some(room_code) = self.room_code.clone() {
                    let msg = ClientEventMsg::CodeUpdate(OutboundCodePayload {
                        room_code,
                        user_id: self.user_id.clone(),
                        code,
                    });
                    self.send_frame(msg).await;
                }
                Flow::Continue
            }

            SessionCommand::SelectDifficulty(difficulty) => {
                self.select_difficulty(difficulty).await;
                Flow::Continue
            }

            SessionCommand::Submit => {
                self.submit_solution().await;
                Flow::Continue
            }

            SessionCommand::Skip => {
                self.skip_problem().await;
                Flow::Continue
            }

            SessionCommand::Leave => {
                self.set_phase(SessionPhase::Terminated).await;
                self.send_leave_once().await;
                // Give the leave event time to flush before the
                // transport goes away and control returns home.
                tokio::time::sleep(self.leave_flush_delay).await;
                self.teardown_after_leave(Some("left the room".into())).await;
                Flow::Stop
            }
        }
    }

    async fn select_difficulty(&mut self, difficulty: Difficulty) {
        let Some(room_code) = self.room_code.clone() else {
            self.notify(NotificationKind::Error, "Not in a room yet");
            return;
        };
        if !self
            .challenges
            .entry(self.user_id.clone())
            .or_default()
            .begin_fetch()
        {
            debug!("select_difficulty ignored: question already in flight or active");
            return;
        }

        match self
            .gateway
            .fetch_problem(&room_code, &self.user_id, difficulty)
            .await
        {
            Ok(problem) => {
                let template = unescape_template(&problem.solution_template);
                self.buffers.set_local(template.clone());
                if let Some(slot) = self.challenges.get_mut(&self.user_id) {
                    slot.install(problem.clone());
                }
                self.emit(SessionEvent::LocalBufferReplaced { code: template });
                self.emit(SessionEvent::QuestionAssigned {
                    user_id: self.user_id.clone(),
                    question: problem,
                });
            }
            Err(e) => {
                if let Some(slot) = self.challenges.get_mut(&self.user_id) {
                    slot.fetch_failed();
                }
                warn!("fetch_problem failed: {e}");
                self.notify(NotificationKind::Error, format!("Could not fetch problem: {e}"));
            }
        }
    }

    async fn submit_solution(&mut self) {
        let Some(room_code) = self.room_code.clone() else {
            self.notify(NotificationKind::Error, "Not in a room yet");
            return;
        };
        let Some(problem_id) = self
            .challenges
            .get(&self.user_id)
            .and_then(|slot| slot.question())
            .map(|q| q.problem_id.clone())
        else {
            self.notify(NotificationKind::Error, "No active question to submit");
            return;
        };
        let code = self.buffers.local().to_string();

        match self
            .gateway
            .submit_solution(&room_code, &self.user_id, &code, &problem_id)
            .await
        {
            Ok(outcome) if outcome.passed => {
                self.notify(NotificationKind::Success, format_success(&outcome));
                if let Some(slot) = self.challenges.get_mut(&self.user_id) {
                    slot.clear();
                }
                self.emit(SessionEvent::QuestionCleared {
                    user_id: self.user_id.clone(),
                });
            }
            // A partial failure is a grading outcome, not a fault: the
            // question stays active so the user can keep iterating.
            Ok(outcome) => {
                self.notify(NotificationKind::Error, format_failure_report(&outcome));
            }
            Err(e) => {
                warn!("submit_solution failed: {e}");
                self.notify(
                    NotificationKind::Error,
                    format!("Could not submit solution: {e}"),
                );
            }
        }
    }

    async fn skip_problem(&mut self) {
        let Some(room_code) = self.room_code.clone() else {
            self.notify(NotificationKind::Error, "Not in a room yet");
            return;
        };
        if self
            .challenges
            .get(&self.user_id)
            .and_then(|slot| slot.question())
            .is_none()
        {
            self.notify(NotificationKind::Error, "No active question to skip");
            return;
        }

        match self.gateway.skip_problem(&room_code, &self.user_id).await {
            Ok(()) => {
                if let Some(slot) = self.challenges.get_mut(&self.user_id) {
                    slot.clear();
                }
                self.emit(SessionEvent::QuestionCleared {
                    user_id: self.user_id.clone(),
                });
            }
            Err(e) => {
                warn!("skip_problem failed: {e}");
                self.notify(NotificationKind::Error, format!("Could not skip problem: {e}"));
            }
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        match (self.notifications.next_deadline(), self.pending_home) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    async fn on_timer(&mut self) -> Flow {
        let now = Instant::now();
        for kind in self.notifications.expire_due(now) {
            self.emit(SessionEvent::NotificationExpired { kind });
        }
        if self.pending_home.is_some_and(|deadline| deadline <= now) {
            self.pending_home = None;
            self.teardown(Some("returning home".into())).await;
            return Flow::Stop;
        }
        Flow::Continue
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Emit the leave event if it has not been emitted yet. Runs at
    /// most once per session no matter how teardown is reached.
    async fn send_leave_once(&mut self) {
        if self.left_sent {
            return;
        }
        let Some(room_code) = self.room_code.clone() else {
            return;
        };
        self.left_sent = true;
        let msg = ClientEventMsg::LeaveGame(LeaveGamePayload {
            room_code,
            user_id: self.user_id.clone(),
        });
        self.send_frame(msg).await;
    }

    /// Full teardown: leave event (once), transport close, pending
    /// timers dropped, hand-off + terminal events.
    async fn teardown(&mut self, reason: Option<String>) {
        self.send_leave_once().await;
        self.teardown_after_leave(reason).await;
    }

    async fn teardown_after_leave(&mut self, reason: Option<String>) {
        let _ = self.transport.close().await;
        self.notifications.clear_all();
        self.shared.connected.store(false, Ordering::Release);
        self.emit_terminal(SessionEvent::ReturnHome).await;
        self.emit_terminal(SessionEvent::Disconnected { reason }).await;
    }

    // ── Emission helpers ────────────────────────────────────────────

    async fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase == phase {
            return;
        }
        self.phase = phase;
        *self.shared.phase.lock().await = phase;
        self.emit(SessionEvent::PhaseChanged(phase));
    }

    fn notify(&mut self, kind: NotificationKind, text: impl Into<String>) {
        let text = text.into();
        self.notifications.set(kind, text.clone(), Instant::now());
        self.emit(SessionEvent::Notification { kind, text });
    }

    async fn send_frame(&mut self, msg: ClientEventMsg) {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if let Err(e) = self.transport.send(json).await {
                    error!("transport send error: {e}");
                    self.notify(
                        NotificationKind::ConnectionWarning,
                        "Could not reach the game server",
                    );
                }
            }
            Err(e) => {
                // Serialization errors are programming bugs; don't kill the loop.
                error!("failed to serialize client event: {e}");
            }
        }
    }

    /// Emit a routine event. If the channel is full, log and drop it to
    /// avoid blocking the session loop.
    fn emit(&self, event: SessionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit a terminal event with a blocking send — `GameOver`,
    /// `ReturnHome`, and `Disconnected` must never be silently dropped.
    async fn emit_terminal(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Sleep until `deadline`, or forever when no timer is pending.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{
        CodeUpdatePayload, CreateRoomResponse, HealthUpdatePayload, Problem, RandomGameResponse,
        SolutionVerifiedPayload, SubmitOutcome, TestCaseResult,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, DuelError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, DuelError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), DuelError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, DuelError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // All scripted frames delivered — hang so the loop
                // stays alive until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), DuelError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    // ── Mock gateway ────────────────────────────────────────────────

    #[derive(Default)]
    struct MockGateway {
        create_room_results: StdMutex<VecDeque<std::result::Result<CreateRoomResponse, DuelError>>>,
        create_room_calls: Arc<StdMutex<u32>>,
        problem_result: StdMutex<Option<std::result::Result<Problem, DuelError>>>,
        submit_result: StdMutex<Option<std::result::Result<SubmitOutcome, DuelError>>>,
        skip_result: StdMutex<Option<std::result::Result<(), DuelError>>>,
    }

    impl MockGateway {
        fn with_room(room_code: &str) -> Self {
            let gateway = Self::default();
            gateway
                .create_room_results
                .lock()
                .unwrap()
                .push_back(Ok(CreateRoomResponse {
                    room_code: room_code.into(),
                }));
            gateway
        }
    }

    #[async_trait]
    impl Gateway for MockGateway {
        async fn create_room(
            &self,
            _user_id: &str,
        ) -> std::result::Result<CreateRoomResponse, DuelError> {
            *self.create_room_calls.lock().unwrap() += 1;
            self.create_room_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(DuelError::Api {
                    status: 500,
                    message: "no scripted create_room result".into(),
                }))
        }

        async fn find_random_game(
            &self,
            _user_id: &str,
        ) -> std::result::Result<RandomGameResponse, DuelError> {
            Err(DuelError::Api {
                status: 500,
                message: "not scripted".into(),
            })
        }

        async fn fetch_problem(
            &self,
            _room_code: &str,
            _user_id: &str,
            _difficulty: Difficulty,
        ) -> std::result::Result<Problem, DuelError> {
            self.problem_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(DuelError::Api {
                    status: 500,
                    message: "no scripted problem".into(),
                }))
        }

        async fn submit_solution(
            &self,
            _room_code: &str,
            _user_id: &str,
            _code: &str,
            _problem_id: &str,
        ) -> std::result::Result<SubmitOutcome, DuelError> {
            self.submit_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(DuelError::Api {
                    status: 500,
                    message: "no scripted outcome".into(),
                }))
        }

        async fn skip_problem(
            &self,
            _room_code: &str,
            _user_id: &str,
        ) -> std::result::Result<(), DuelError> {
            self.skip_result.lock().unwrap().take().unwrap_or(Ok(()))
        }

        async fn fetch_leaderboard(
            &self,
        ) -> std::result::Result<Vec<crate::protocol::LeaderboardEntry>, DuelError> {
            Ok(vec![])
        }

        async fn fetch_history(
            &self,
            _user_id: &str,
        ) -> std::result::Result<Vec<crate::protocol::HistoryEntry>, DuelError> {
            Ok(vec![])
        }
    }

    // ── Loop construction helper ────────────────────────────────────

    fn test_loop(
        config: SessionConfig,
        gateway: MockGateway,
    ) -> (
        SessionLoop<MockTransport, MockGateway>,
        mpsc::Receiver<SessionEvent>,
        Arc<StdMutex<Vec<String>>>,
    ) {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (event_tx, event_rx) = mpsc::channel(64);
        let initial_role = if config.creator {
            Role::Creator
        } else {
            Role::Joiner
        };
        let shared = Arc::new(SharedState::new(initial_role));
        let session_loop = SessionLoop::new(
            transport,
            gateway,
            event_tx,
            shared,
            config,
            initial_role,
        );
        (session_loop, event_rx, sent)
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn problem() -> Problem {
        Problem {
            problem_id: "p1".into(),
            title: "Two Sum".into(),
            difficulty: Difficulty::Easy,
            description: "desc".into(),
            solution_template: "def two_sum(nums):\\n    pass\\n".into(),
        }
    }

    // ── Health fold property ────────────────────────────────────────

    #[tokio::test]
    async fn health_state_is_last_write_per_participant() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );

        let updates = [("a", 100), ("b", 90), ("a", 75), ("b", 40), ("a", 60)];
        for (id, hp) in updates {
            sl.handle_server_event(ServerEvent::UpdatePlayerHealth(HealthUpdatePayload {
                user_id: id.into(),
                health: hp,
            }))
            .await;
        }

        assert_eq!(sl.health.get("a"), Some(&60));
        assert_eq!(sl.health.get("b"), Some(&40));

        // The event stream carries one HealthChanged per update.
        let health_events = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::HealthChanged { .. }))
            .count();
        assert_eq!(health_events, 5);
    }

    #[tokio::test]
    async fn health_is_clamped_to_ceiling() {
        let (mut sl, _rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );
        sl.handle_server_event(ServerEvent::UpdatePlayerHealth(HealthUpdatePayload {
            user_id: "a".into(),
            health: 5000,
        }))
        .await;
        assert_eq!(sl.health.get("a"), Some(&MAX_HEALTH));
    }

    // ── create_room deduplication ───────────────────────────────────

    #[tokio::test]
    async fn duplicate_create_room_is_suppressed() {
        let gateway = MockGateway::with_room("AB12CD");
        let calls = Arc::clone(&gateway.create_room_calls);
        let (mut sl, mut rx, sent) = test_loop(SessionConfig::creator("u1"), gateway);

        sl.bootstrap_join().await;
        // Duplicate trigger (double mount): the dedup key suppresses it.
        sl.create_room().await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(sl.room_code.as_deref(), Some("AB12CD"));

        // Exactly one join frame went out.
        let joins = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains("join_game"))
            .count();
        assert_eq!(joins, 1);

        // No error was surfaced.
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, SessionEvent::Notification { .. })));
    }

    #[tokio::test]
    async fn already_in_room_failure_is_swallowed() {
        let gateway = MockGateway::default();
        gateway
            .create_room_results
            .lock()
            .unwrap()
            .push_back(Err(DuelError::Api {
                status: 400,
                message: "User already in a game room".into(),
            }));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::creator("u1"), gateway);

        sl.create_room().await;

        // Non-fatal: no notification, and the guard stays armed.
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, SessionEvent::Notification { .. })));
        assert!(sl.dedup_keys.contains("create_room:u1"));
    }

    #[tokio::test]
    async fn hard_create_room_failure_rearms_and_notifies_once() {
        let gateway = MockGateway::default();
        gateway
            .create_room_results
            .lock()
            .unwrap()
            .push_back(Err(DuelError::Api {
                status: 500,
                message: "database unavailable".into(),
            }));
        gateway
            .create_room_results
            .lock()
            .unwrap()
            .push_back(Ok(CreateRoomResponse {
                room_code: "RETRY1".into(),
            }));
        let calls = Arc::clone(&gateway.create_room_calls);
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::creator("u1"), gateway);

        sl.create_room().await;
        let errors = drain(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::Notification {
                        kind: NotificationKind::Error,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(errors, 1);

        // The key was re-armed, so a retry goes through.
        sl.create_room().await;
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(sl.room_code.as_deref(), Some("RETRY1"));
    }

    // ── Phase transitions ───────────────────────────────────────────

    #[tokio::test]
    async fn game_ready_captures_roster_names_health_and_start() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("u1", "AB12CD"),
            MockGateway::default(),
        );

        let raw = r#"{"event":"game_ready","data":{
            "players":["u1","u2"],
            "usernames":{"u1":"alice","u2":"bob"},
            "health":{"u1":100,"u2":100},
            "started_at":"2026-08-01T12:00:00Z"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        sl.handle_server_event(event).await;

        assert_eq!(sl.phase, SessionPhase::Active);
        assert_eq!(sl.roster, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(sl.health.get("u1"), Some(&100));
        assert_eq!(sl.health.get("u2"), Some(&100));
        assert_eq!(sl.started_at.as_deref(), Some("2026-08-01T12:00:00Z"));

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PhaseChanged(SessionPhase::Active))));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::RosterUpdated { .. })));
    }

    #[tokio::test]
    async fn spectator_role_comes_from_event_type_not_roster_size() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("watcher", "AB12CD"),
            MockGateway::default(),
        );

        let raw = r#"{"event":"joined_as_spectator","data":{
            "players":["u1","u2"],
            "usernames":{"u1":"alice","u2":"bob"},
            "health":{"u1":80,"u2":55},
            "code":{"u1":"left()","u2":"right()"},
            "active_questions":{"u1":{"problem_id":"p9","title":"T","difficulty":"medium","description":"d","solution_template":""}}}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        sl.handle_server_event(event).await;

        assert_eq!(sl.role, Role::Spectator);
        assert_eq!(sl.phase, SessionPhase::SpectatorActive);
        assert_eq!(sl.buffers.left(), Some("left()"));
        assert_eq!(sl.buffers.right(), Some("right()"));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::QuestionAssigned { user_id, .. } if user_id == "u1"
        )));
    }

    #[tokio::test]
    async fn spectator_code_updates_route_by_seat() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("watcher", "AB12CD"),
            MockGateway::default(),
        );
        let snapshot = r#"{"event":"joined_as_spectator","data":{"players":["a","b"]}}"#;
        sl.handle_server_event(serde_json::from_str(snapshot).unwrap())
            .await;
        drain(&mut rx);

        for (id, code) in [("b", "b1"), ("a", "a1"), ("b", "b2"), ("a", "a2")] {
            sl.handle_server_event(ServerEvent::OpponentCodeUpdate(CodeUpdatePayload {
                user_id: id.into(),
                code: code.into(),
            }))
            .await;
        }

        for event in drain(&mut rx) {
            if let SessionEvent::CodeMirrorUpdated { user_id, slot, .. } = event {
                match user_id.as_str() {
                    "a" => assert_eq!(slot, DisplaySlot::Left),
                    "b" => assert_eq!(slot, DisplaySlot::Right),
                    other => panic!("unexpected participant {other}"),
                }
            }
        }
        assert_eq!(sl.buffers.left(), Some("a2"));
        assert_eq!(sl.buffers.right(), Some("b2"));
    }

    #[tokio::test]
    async fn player_self_echo_is_ignored() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );
        let ready = r#"{"event":"game_ready","data":{"players":["a","b"],"health":{"a":100,"b":100}}}"#;
        sl.handle_server_event(serde_json::from_str(ready).unwrap())
            .await;
        drain(&mut rx);

        sl.handle_server_event(ServerEvent::OpponentCodeUpdate(CodeUpdatePayload {
            user_id: "a".into(),
            code: "stale echo".into(),
        }))
        .await;

        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, SessionEvent::CodeMirrorUpdated { .. })));
        assert_eq!(sl.buffers.local(), CodeBuffers::DEFAULT_LOCAL);
    }

    #[tokio::test]
    async fn player_disconnected_keeps_health_and_roster_clears_mirror() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );
        let ready = r#"{"event":"game_ready","data":{"players":["a","b"],"health":{"a":70,"b":90}}}"#;
        sl.handle_server_event(serde_json::from_str(ready).unwrap())
            .await;
        sl.handle_server_event(ServerEvent::OpponentCodeUpdate(CodeUpdatePayload {
            user_id: "b".into(),
            code: "half done".into(),
        }))
        .await;
        drain(&mut rx);

        let raw = r#"{"event":"player_disconnected","data":{"user_id":"b"}}"#;
        sl.handle_server_event(serde_json::from_str(raw).unwrap())
            .await;

        assert_eq!(sl.phase, SessionPhase::WaitingForOpponent);
        assert_eq!(sl.roster.len(), 2);
        assert_eq!(sl.health.get("b"), Some(&90));
        assert_eq!(sl.buffers.opponent(), None);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::ConnectionWarning,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn game_over_hands_off_result_verbatim() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("u2", "AB12CD"),
            MockGateway::default(),
        );

        let raw = r#"{"event":"game_over","data":{
            "winner_id":"u1","loser_id":"u2",
            "questions_answered":{"u1":3,"u2":1},
            "final_health":{"u1":40,"u2":0}}}"#;
        let flow = sl
            .handle_server_event(serde_json::from_str(raw).unwrap())
            .await;
        assert_eq!(flow, Flow::Stop);

        let game_over = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::GameOver(result) => Some(result),
                _ => None,
            })
            .unwrap();
        assert_eq!(game_over.winner_id, "u1");
        assert_eq!(game_over.loser_id, "u2");
        assert_eq!(game_over.questions_answered.get("u1"), Some(&3));
        assert_eq!(game_over.final_health.get("u2"), Some(&0));
    }

    // ── Challenge flow ──────────────────────────────────────────────

    #[tokio::test]
    async fn select_difficulty_installs_question_and_template() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;

        assert_eq!(sl.buffers.local(), "def two_sum(nums):\n    pass\n");
        assert_eq!(
            sl.challenges
                .get("a")
                .and_then(|s| s.question())
                .map(|q| q.problem_id.as_str()),
            Some("p1")
        );
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::LocalBufferReplaced { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::QuestionAssigned { .. })));
    }

    #[tokio::test]
    async fn select_difficulty_failure_stays_idle_and_notifies() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Err(DuelError::Api {
            status: 404,
            message: "no problems left".into(),
        }));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Hard))
            .await;

        assert!(sl
            .challenges
            .get("a")
            .and_then(|s| s.question())
            .is_none());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        )));

        // Back to Idle: a new selection is accepted.
        assert!(sl
            .challenges
            .get_mut("a")
            .map(|s| s.begin_fetch())
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn submit_full_pass_clears_question_and_raises_success() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        *gateway.submit_result.lock().unwrap() = Some(Ok(SubmitOutcome {
            passed: true,
            passed_tests: 4,
            total_tests: 4,
            per_test: vec![],
        }));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;
        drain(&mut rx);
        sl.handle_command(SessionCommand::Submit).await;

        let events = drain(&mut rx);
        let successes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Notification {
                    kind: NotificationKind::Success,
                    text,
                } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(successes.len(), 1);
        assert!(successes[0].contains("4/4"));
        assert!(sl.challenges.get("a").and_then(|s| s.question()).is_none());
    }

    #[tokio::test]
    async fn submit_partial_failure_reports_cases_and_keeps_question() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        *gateway.submit_result.lock().unwrap() = Some(Ok(SubmitOutcome {
            passed: false,
            passed_tests: 1,
            total_tests: 3,
            per_test: vec![
                TestCaseResult {
                    case: "[1]".into(),
                    expected: "1".into(),
                    actual: "1".into(),
                    passed: true,
                },
                TestCaseResult {
                    case: "[2]".into(),
                    expected: "2".into(),
                    actual: "0".into(),
                    passed: false,
                },
                TestCaseResult {
                    case: "[3]".into(),
                    expected: "3".into(),
                    actual: "-1".into(),
                    passed: false,
                },
            ],
        }));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;
        drain(&mut rx);
        sl.handle_command(SessionCommand::Submit).await;

        let errors: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Notification {
                    kind: NotificationKind::Error,
                    text,
                } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected 2, got 0"));
        assert!(errors[0].contains("expected 3, got -1"));
        assert!(!errors[0].contains("[1]:"));
        // The question is retained for further iteration.
        assert!(sl.challenges.get("a").and_then(|s| s.question()).is_some());
    }

    #[tokio::test]
    async fn skip_clears_question_unconditionally() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;
        drain(&mut rx);
        sl.handle_command(SessionCommand::Skip).await;

        assert!(sl.challenges.get("a").and_then(|s| s.question()).is_none());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::QuestionCleared { .. })));
    }

    #[tokio::test]
    async fn skip_failure_leaves_state_unchanged() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        *gateway.skip_result.lock().unwrap() = Some(Err(DuelError::Api {
            status: 500,
            message: "skip rejected".into(),
        }));
        let (mut sl, mut rx, _sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;
        drain(&mut rx);
        sl.handle_command(SessionCommand::Skip).await;

        assert!(sl.challenges.get("a").and_then(|s| s.question()).is_some());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn remote_question_events_set_and_clear() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );

        // A selection by the local participant arriving over the
        // channel is ignored (local installs happen via the gateway).
        sl.handle_server_event(ServerEvent::PlayerSelectedQuestion(
            crate::protocol::QuestionSelectedPayload {
                user_id: "a".into(),
                question: problem(),
            },
        ))
        .await;
        assert!(sl.challenges.get("a").and_then(|s| s.question()).is_none());

        sl.handle_server_event(ServerEvent::PlayerSelectedQuestion(
            crate::protocol::QuestionSelectedPayload {
                user_id: "b".into(),
                question: problem(),
            },
        ))
        .await;
        assert!(sl.challenges.get("b").and_then(|s| s.question()).is_some());

        sl.handle_server_event(ServerEvent::PlayerAnsweredQuestion(
            crate::protocol::QuestionAnsweredPayload { user_id: "b".into() },
        ))
        .await;
        assert!(sl.challenges.get("b").and_then(|s| s.question()).is_none());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::QuestionCleared { user_id } if user_id == "b"
        )));
    }

    // ── Hard mode ───────────────────────────────────────────────────

    #[tokio::test]
    async fn verified_correct_fires_answered_question_with_live_hard_mode() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        let (mut sl, _rx, sent) = test_loop(SessionConfig::joiner("a", "AB12CD"), gateway);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;

        // Toggle hard mode after the question was fetched: the value at
        // verification time is what goes out.
        sl.shared.hard_mode.store(true, Ordering::Release);

        sl.handle_server_event(ServerEvent::SolutionVerified(SolutionVerifiedPayload {
            user_id: "a".into(),
            correct: true,
            question: None,
        }))
        .await;

        let frames = sent.lock().unwrap();
        let answered = frames
            .iter()
            .find(|f| f.contains("answered-question"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(answered).unwrap();
        assert_eq!(value["data"]["hard_mode_active"], true);
        assert_eq!(value["data"]["correct"], true);
        assert_eq!(value["data"]["question"]["problem_id"], "p1");
    }

    #[tokio::test]
    async fn verified_events_for_others_or_incorrect_are_not_answered() {
        let (mut sl, _rx, sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );

        sl.handle_server_event(ServerEvent::SolutionVerified(SolutionVerifiedPayload {
            user_id: "b".into(),
            correct: true,
            question: Some(problem()),
        }))
        .await;
        sl.handle_server_event(ServerEvent::SolutionVerified(SolutionVerifiedPayload {
            user_id: "a".into(),
            correct: false,
            question: Some(problem()),
        }))
        .await;

        assert!(sent
            .lock()
            .unwrap()
            .iter()
            .all(|f| !f.contains("answered-question")));
    }

    // ── Leave / teardown ────────────────────────────────────────────

    #[tokio::test]
    async fn teardown_emits_leave_exactly_once() {
        let (mut sl, mut rx, sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );
        sl.send_join("AB12CD".into()).await;

        sl.teardown(Some("first".into())).await;
        sl.teardown(Some("second".into())).await;

        let leaves = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains("leave_game"))
            .count();
        assert_eq!(leaves, 1);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::ReturnHome)));
    }

    #[tokio::test]
    async fn player_left_schedules_home_handoff() {
        let (mut sl, mut rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD").with_leave_delay(Duration::from_millis(10)),
            MockGateway::default(),
        );

        let raw = r#"{"event":"player_left","data":{"user_id":"b"}}"#;
        sl.handle_server_event(serde_json::from_str(raw).unwrap())
            .await;

        assert_eq!(sl.phase, SessionPhase::Terminated);
        assert!(sl.pending_home.is_some());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        )));

        // Before the deadline nothing fires; at the deadline the
        // hand-off happens and the loop stops.
        assert_eq!(sl.on_timer().await, Flow::Continue);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sl.on_timer().await, Flow::Stop);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, SessionEvent::ReturnHome)));
    }

    #[tokio::test]
    async fn spectator_commands_are_ignored() {
        let gateway = MockGateway::default();
        *gateway.problem_result.lock().unwrap() = Some(Ok(problem()));
        let (mut sl, mut rx, sent) = test_loop(SessionConfig::joiner("w", "AB12CD"), gateway);
        let snapshot = r#"{"event":"joined_as_spectator","data":{"players":["a","b"]}}"#;
        sl.handle_server_event(serde_json::from_str(snapshot).unwrap())
            .await;
        drain(&mut rx);

        sl.handle_command(SessionCommand::SelectDifficulty(Difficulty::Easy))
            .await;
        sl.handle_command(SessionCommand::EditCode("nope".into()))
            .await;

        assert!(sl.challenges.get("w").is_none());
        assert!(sent
            .lock()
            .unwrap()
            .iter()
            .all(|f| !f.contains("code_update")));
    }

    // ── End-to-end over the spawned loop ────────────────────────────

    #[tokio::test]
    async fn creator_flow_reaches_waiting_with_room_code() {
        let waiting = r#"{"event":"waiting_for_player","data":{"room_code":"AB12CD"}}"#;
        let (transport, sent, _closed) =
            MockTransport::new(vec![Some(Ok(waiting.to_string()))]);
        let gateway = MockGateway::with_room("AB12CD");

        let (mut session, mut events) =
            DuelSession::start(transport, gateway, SessionConfig::creator("u1"));

        let mut saw_waiting = false;
        let mut saw_room = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            match event {
                SessionEvent::PhaseChanged(SessionPhase::WaitingForOpponent) => {
                    saw_waiting = true;
                    break;
                }
                SessionEvent::RoomAssigned { ref room_code } if room_code == "AB12CD" => {
                    saw_room = true;
                }
                _ => {}
            }
        }
        assert!(saw_waiting);
        assert!(saw_room);
        assert_eq!(session.current_room_code().await.as_deref(), Some("AB12CD"));
        assert_eq!(session.phase().await, SessionPhase::WaitingForOpponent);

        // The join frame carried the assigned code and our id.
        {
            let frames = sent.lock().unwrap();
            let join = frames.iter().find(|f| f.contains("join_game")).unwrap();
            let value: serde_json::Value = serde_json::from_str(join).unwrap();
            assert_eq!(value["data"]["room_code"], "AB12CD");
            assert_eq!(value["data"]["user_id"], "u1");
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn edit_code_emits_full_buffer_update() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let gateway = MockGateway::default();

        let (mut session, mut events) =
            DuelSession::start(transport, gateway, SessionConfig::joiner("u1", "AB12CD"));

        // Wait for the connecting events so the loop is up.
        let _ = tokio::time::timeout(Duration::from_secs(1), events.recv()).await;

        session.edit_code("fn main() {}").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let frames = sent.lock().unwrap();
            let update = frames.iter().find(|f| f.contains("code_update")).unwrap();
            let value: serde_json::Value = serde_json::from_str(update).unwrap();
            assert_eq!(value["data"]["code"], "fn main() {}");
            assert_eq!(value["data"]["room_code"], "AB12CD");
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_emits_leave_and_disconnected() {
        let (transport, sent, closed) = MockTransport::new(vec![]);
        let gateway = MockGateway::default();

        let (mut session, mut events) =
            DuelSession::start(transport, gateway, SessionConfig::joiner("u1", "AB12CD"));
        let _ = tokio::time::timeout(Duration::from_secs(1), events.recv()).await;

        session.shutdown().await;
        assert!(!session.is_connected());
        assert!(matches!(session.submit(), Err(DuelError::NotConnected)));

        let mut saw_disconnected = false;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, SessionEvent::Disconnected { .. }) {
                saw_disconnected = true;
            }
        }
        assert!(saw_disconnected);
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(
            sent.lock()
                .unwrap()
                .iter()
                .filter(|m| m.contains("leave_game"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn notification_expiry_fires_through_loop_timer() {
        let error_frame = r#"{"event":"error","data":{"message":"room is full"}}"#;
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(error_frame.to_string()))]);
        let gateway = MockGateway::default();

        let config = SessionConfig::joiner("u1", "AB12CD")
            .with_notify_ttl(Duration::from_millis(30));
        let (mut session, mut events) = DuelSession::start(transport, gateway, config);

        let mut saw_notification = false;
        let mut saw_expiry = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            match event {
                SessionEvent::Notification {
                    kind: NotificationKind::Error,
                    ref text,
                } => {
                    assert_eq!(text, "room is full");
                    saw_notification = true;
                }
                SessionEvent::NotificationExpired {
                    kind: NotificationKind::Error,
                } => {
                    saw_expiry = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_notification);
        assert!(saw_expiry);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn config_defaults_and_builders() {
        let config = SessionConfig::creator("u1");
        assert!(config.creator);
        assert!(config.room_code.is_none());
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.leave_delay, Duration::from_secs(3));

        let config = SessionConfig::joiner("u2", "XY99ZZ")
            .with_event_channel_capacity(0)
            .with_notify_ttl(Duration::from_millis(100))
            .with_shutdown_timeout(Duration::from_secs(5));
        assert!(!config.creator);
        assert_eq!(config.room_code.as_deref(), Some("XY99ZZ"));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.notify_ttl, Duration::from_millis(100));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));

        let config = SessionConfig::creator_in_room("u3", "QM0001");
        assert!(config.creator);
        assert_eq!(config.room_code.as_deref(), Some("QM0001"));
    }

    #[tokio::test]
    async fn room_code_is_immutable_once_assigned() {
        let (mut sl, _rx, _sent) = test_loop(
            SessionConfig::joiner("a", "AB12CD"),
            MockGateway::default(),
        );
        sl.assign_room_code("ZZ99XX".into()).await;
        assert_eq!(sl.room_code.as_deref(), Some("AB12CD"));
    }
}
