use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::router::{ControlEvent, MessageRouter, RouteOutcome};
use crate::core::kernel::ws::{WsConfig, WsSession};
use crate::core::types::ConnectionState;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

#[derive(Debug, Default)]
struct ConnectionStats {
    connects: AtomicU64,
    reconnect_attempts: AtomicU64,
    subscribe_frames: AtomicU64,
    unsubscribe_frames: AtomicU64,
    frames_received: AtomicU64,
    server_errors: AtomicU64,
}

/// Point-in-time copy of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatsSnapshot {
    /// Successful socket opens, the first one included.
    pub connects: u64,
    pub reconnect_attempts: u64,
    pub subscribe_frames: u64,
    pub unsubscribe_frames: u64,
    pub frames_received: u64,
    pub server_errors: u64,
}

impl ConnectionStats {
    fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            subscribe_frames: self.subscribe_frames.load(Ordering::Relaxed),
            unsubscribe_frames: self.unsubscribe_frames.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectionState>,
    /// Channels assigned to this connection, in subscription order.
    channels: RwLock<Vec<String>>,
    stats: ConnectionStats,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

/// Owner-side handle of one physical connection.
///
/// The socket itself lives in a spawned task; the handle records the assigned
/// channel set and forwards subscription changes to the task. Whatever the set
/// holds when the task reaches `Open` is (re)subscribed.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: usize,
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    shutdown: watch::Sender<bool>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    /// Start the connection task. Must be called inside a Tokio runtime.
    pub fn spawn<W: WsSession>(
        id: usize,
        session: W,
        codec: Arc<dyn WsCodec>,
        router: Arc<MessageRouter>,
        config: WsConfig,
        exchange_name: String,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Connecting),
            channels: RwLock::new(Vec::new()),
            stats: ConnectionStats::default(),
        });

        let control_limiter = RateLimiter::direct(Quota::per_second(config.control_frames_per_second));
        let task = ConnectionTask {
            id,
            exchange_name,
            session,
            codec,
            router,
            config,
            shared: shared.clone(),
            commands: command_rx,
            shutdown: shutdown_rx,
            control_limiter,
            outbox: VecDeque::new(),
            subscribed: HashSet::new(),
            next_request_id: 1,
        };

        Self {
            id,
            commands,
            shutdown,
            shared,
            task: Mutex::new(Some(tokio::spawn(task.run()))),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn channels(&self) -> Vec<String> {
        self.shared.channels.read().clone()
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels.read().len()
    }

    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Assign channels to this connection and subscribe them once it is open.
    pub fn subscribe(&self, channels: Vec<String>) -> Result<(), ExchangeError> {
        {
            let mut assigned = self.shared.channels.write();
            for channel in &channels {
                if !assigned.contains(channel) {
                    assigned.push(channel.clone());
                }
            }
        }
        self.send(ConnectionCommand::Subscribe(channels))
    }

    /// Drop channels from this connection; they are never resubscribed.
    pub fn unsubscribe(&self, channels: Vec<String>) -> Result<(), ExchangeError> {
        self.shared
            .channels
            .write()
            .retain(|assigned| !channels.contains(assigned));
        self.send(ConnectionCommand::Unsubscribe(channels))
    }

    fn send(&self, command: ConnectionCommand) -> Result<(), ExchangeError> {
        self.commands.send(command).map_err(|_| {
            ExchangeError::ConnectionClosed(format!("connection {} is closed", self.id))
        })
    }

    /// Stop the task, interrupting any backoff wait, and close the socket.
    pub async fn close(&self) {
        self.shared.set_state(ConnectionState::Closed);
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(connection = self.id, error = %e, "connection task ended abnormally");
            }
        }
        self.shared.set_state(ConnectionState::Closed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    Subscribe,
    Unsubscribe,
}

/// A SUBSCRIBE/UNSUBSCRIBE frame waiting for control-rate budget.
#[derive(Debug)]
struct PendingFrame {
    kind: ControlKind,
    channels: Vec<String>,
}

enum SessionExit {
    Shutdown,
    Disconnected(String),
}

struct ConnectionTask<W: WsSession> {
    id: usize,
    exchange_name: String,
    session: W,
    codec: Arc<dyn WsCodec>,
    router: Arc<MessageRouter>,
    config: WsConfig,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    shutdown: watch::Receiver<bool>,
    control_limiter: DefaultDirectRateLimiter,
    /// Frames not yet sent on the current socket, oldest first.
    outbox: VecDeque<PendingFrame>,
    /// Channels subscribed, or queued for subscription, on the current socket.
    subscribed: HashSet<String>,
    next_request_id: u64,
}

impl<W: WsSession> ConnectionTask<W> {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, connection = self.id))]
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut ever_connected = false;

        'lifecycle: loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.shared.set_state(if ever_connected || attempt > 0 {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            let connected = tokio::select! {
                _ = self.shutdown.changed() => break 'lifecycle,
                result = self.session.connect() => result,
            };

            match connected {
                Ok(()) => {
                    self.shared.stats.connects.fetch_add(1, Ordering::Relaxed);
                    if ever_connected {
                        info!(attempt, "reconnected");
                    } else {
                        info!("connected");
                    }
                    ever_connected = true;
                    attempt = 0;
                    self.shared.set_state(ConnectionState::Open);

                    match self.session_loop().await {
                        SessionExit::Shutdown => break 'lifecycle,
                        SessionExit::Disconnected(reason) => {
                            warn!(%reason, "connection lost");
                            let _ = self.session.close().await;
                        }
                    }
                }
                Err(e) => warn!(attempt, error = %e, "connect failed"),
            }

            self.shared.set_state(ConnectionState::Reconnecting);
            let delay = self.config.reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            self.shared
                .stats
                .reconnect_attempts
                .fetch_add(1, Ordering::Relaxed);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");

            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    () = &mut backoff => break,
                    _ = self.shutdown.changed() => break 'lifecycle,
                    command = self.commands.recv() => {
                        // The assigned set is authoritative; it is replayed on reconnect.
                        if command.is_none() {
                            break 'lifecycle;
                        }
                    }
                }
            }
        }

        let _ = self.session.close().await;
        self.shared.set_state(ConnectionState::Closed);
        debug!("connection task stopped");
    }

    async fn session_loop(&mut self) -> SessionExit {
        self.subscribed.clear();
        self.outbox.clear();
        let assigned = self.shared.channels.read().clone();
        self.queue_subscribe(assigned);

        let ping_every = Duration::from_millis(self.config.ping_interval_ms.max(1));
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms.max(1));
        let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return SessionExit::Shutdown,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionExit::Shutdown;
                    };
                    self.apply(command);
                }
                _ = self.control_limiter.until_ready(), if !self.outbox.is_empty() => {
                    if let Err(e) = self.send_next_control().await {
                        return SessionExit::Disconnected(e.to_string());
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = self.session.send_raw(Message::Ping(Vec::new())).await {
                        return SessionExit::Disconnected(e.to_string());
                    }
                }
                () = tokio::time::sleep_until(last_frame + read_timeout) => {
                    return SessionExit::Disconnected(format!(
                        "no frame received for {}ms",
                        read_timeout.as_millis()
                    ));
                }
                frame = self.session.next_raw() => match frame {
                    None => return SessionExit::Disconnected("stream ended".to_string()),
                    Some(Err(e)) => return SessionExit::Disconnected(e.to_string()),
                    Some(Ok(message)) => {
                        last_frame = Instant::now();
                        self.shared.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                        match self.router.route(message) {
                            RouteOutcome::Control(ControlEvent::Disconnect) => {
                                return SessionExit::Disconnected("server sent close frame".to_string());
                            }
                            RouteOutcome::Control(ControlEvent::ServerError { .. }) => {
                                self.shared.stats.server_errors.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {}
                        }
                    }
                },
            }
        }
    }

    fn apply(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Subscribe(channels) => self.queue_subscribe(channels),
            ConnectionCommand::Unsubscribe(channels) => self.queue_unsubscribe(channels),
        }
    }

    /// Queue SUBSCRIBE frames for assigned channels not yet on this socket.
    fn queue_subscribe(&mut self, channels: Vec<String>) {
        let fresh: Vec<String> = {
            let assigned = self.shared.channels.read();
            channels
                .into_iter()
                .filter(|c| assigned.contains(c) && self.subscribed.insert(c.clone()))
                .collect()
        };
        self.enqueue(ControlKind::Subscribe, fresh);
    }

    /// Channels still waiting in a queued SUBSCRIBE are dropped from it; only
    /// channels already subscribed on the wire get an UNSUBSCRIBE frame.
    fn queue_unsubscribe(&mut self, channels: Vec<String>) {
        let mut on_wire = Vec::new();
        for channel in channels {
            if !self.subscribed.remove(&channel) {
                continue;
            }
            let mut was_queued = false;
            for frame in &mut self.outbox {
                if frame.kind == ControlKind::Subscribe {
                    let before = frame.channels.len();
                    frame.channels.retain(|c| c != &channel);
                    was_queued |= frame.channels.len() != before;
                }
            }
            if !was_queued {
                on_wire.push(channel);
            }
        }
        self.outbox.retain(|frame| !frame.channels.is_empty());
        self.enqueue(ControlKind::Unsubscribe, on_wire);
    }

    fn enqueue(&mut self, kind: ControlKind, channels: Vec<String>) {
        let batch = self.config.subscribe_batch_size.max(1);
        for chunk in channels.chunks(batch) {
            self.outbox.push_back(PendingFrame {
                kind,
                channels: chunk.to_vec(),
            });
        }
    }

    /// Send the oldest queued frame. The caller has already taken rate budget.
    async fn send_next_control(&mut self) -> Result<(), ExchangeError> {
        let Some(frame) = self.outbox.pop_front() else {
            return Ok(());
        };
        let id = self.next_request_id;
        self.next_request_id += 1;

        match frame.kind {
            ControlKind::Subscribe => {
                let encoded = self.codec.encode_subscription(&frame.channels, id)?;
                self.session.send_raw(encoded).await?;
                self.shared
                    .stats
                    .subscribe_frames
                    .fetch_add(1, Ordering::Relaxed);
                debug!(id, channels = ?frame.channels, pending = self.outbox.len(), "subscribe sent");
            }
            ControlKind::Unsubscribe => {
                let encoded = self.codec.encode_unsubscription(&frame.channels, id)?;
                self.session.send_raw(encoded).await?;
                self.shared
                    .stats
                    .unsubscribe_frames
                    .fetch_add(1, Ordering::Relaxed);
                debug!(id, channels = ?frame.channels, "unsubscribe sent");
            }
        }
        Ok(())
    }
}
