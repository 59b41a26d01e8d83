//! WebSocket Connection Lifecycle Manager.
//!
//! Sessions live in an arena keyed by [`ConnectionId`]; socket tasks hold only
//! the id and a command receiver. The periodic sweep is split into a pure
//! [`ConnectionManager::sweep_at`] that decides and [`ConnectionManager::apply`]
//! that delivers commands.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use market_data_services::EventSender;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Idle time after which a heartbeat ping is sent.
    pub heartbeat_after: Duration,
    /// Idle time after which the connection is closed.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long to wait for the peer's close acknowledgment.
    pub close_grace: Duration,
    /// Application-level inbound message limit.
    pub max_message_bytes: usize,
    /// Hard limit handed to the WebSocket codec; frames above it drop the connection.
    pub transport_max_message_bytes: usize,
    pub soft_limit_messages: u64,
    pub soft_limit_window: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_after: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
            close_grace: Duration::from_secs(5),
            max_message_bytes: 1024 * 1024,
            transport_max_message_bytes: 16 * 1024 * 1024,
            soft_limit_messages: 100,
            soft_limit_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub id: ConnectionId,
    pub connected_at: Instant,
    /// Last inbound application message. Pongs do not count.
    pub last_activity_at: Instant,
    pub last_pong_at: Option<Instant>,
    pub message_count: u64,
}

/// Serializable view of a session for `server/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: ConnectionId,
    pub connected_secs: u64,
    pub idle_secs: u64,
    pub message_count: u64,
}

/// Instructions from the manager to a socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Ping,
    Close { code: u16, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Ping(ConnectionId),
    Evict(ConnectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAdmission {
    Accepted,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened { id: ConnectionId },
    Evicted { id: ConnectionId, idle_secs: u64 },
    Closed { id: ConnectionId, messages: u64, reason: String },
    ShutdownStarted { open: usize },
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Opened { id } => write!(f, "connection {} opened", id),
            ConnectionEvent::Evicted { id, idle_secs } => {
                write!(f, "connection {} evicted after {}s idle", id, idle_secs)
            }
            ConnectionEvent::Closed {
                id,
                messages,
                reason,
            } => write!(f, "connection {} closed ({}) after {} messages", id, reason, messages),
            ConnectionEvent::ShutdownStarted { open } => {
                write!(f, "closing {} open connections for shutdown", open)
            }
        }
    }
}

struct Slot {
    session: ConnectionSession,
    commands: mpsc::Sender<ConnectionCommand>,
    closing: bool,
}

pub struct ConnectionManager {
    config: LifecycleConfig,
    slots: Mutex<HashMap<ConnectionId, Slot>>,
    tracker: TaskTracker,
    events: Option<EventSender<ConnectionEvent>>,
}

impl ConnectionManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender<ConnectionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Tracker that socket tasks run under; shutdown waits on it.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    pub fn register(&self, commands: mpsc::Sender<ConnectionCommand>) -> ConnectionId {
        self.register_at(commands, Instant::now())
    }

    pub fn register_at(&self, commands: mpsc::Sender<ConnectionCommand>, now: Instant) -> ConnectionId {
        let id = ConnectionId::new();
        let session = ConnectionSession {
            id,
            connected_at: now,
            last_activity_at: now,
            last_pong_at: None,
            message_count: 0,
        };
        self.lock().insert(
            id,
            Slot {
                session,
                commands,
                closing: false,
            },
        );
        tracing::debug!("Registered WebSocket connection {}", id);
        self.emit(ConnectionEvent::Opened { id });
        id
    }

    /// Count an inbound message and apply the soft rate limit.
    pub fn record_message(&self, id: ConnectionId, now: Instant) -> MessageAdmission {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(&id) else {
            return MessageAdmission::Accepted;
        };
        let session = &mut slot.session;
        session.last_activity_at = now;
        session.message_count += 1;

        let in_window =
            now.saturating_duration_since(session.connected_at) < self.config.soft_limit_window;
        if in_window && session.message_count > self.config.soft_limit_messages {
            MessageAdmission::RateLimited
        } else {
            MessageAdmission::Accepted
        }
    }

    pub fn record_pong(&self, id: ConnectionId, now: Instant) {
        if let Some(slot) = self.lock().get_mut(&id) {
            slot.session.last_pong_at = Some(now);
        }
    }

    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionSession> {
        self.lock().remove(&id).map(|slot| slot.session)
    }

    pub fn session(&self, id: ConnectionId) -> Option<ConnectionSession> {
        self.lock().get(&id).map(|slot| slot.session.clone())
    }

    pub fn session_info(&self, id: ConnectionId, now: Instant) -> Option<SessionInfo> {
        self.lock().get(&id).map(|slot| SessionInfo {
            id,
            connected_secs: now.saturating_duration_since(slot.session.connected_at).as_secs(),
            idle_secs: now.saturating_duration_since(slot.session.last_activity_at).as_secs(),
            message_count: slot.session.message_count,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    /// Decide what each connection needs at `now`. Connections already being
    /// closed are left alone.
    pub fn sweep_at(&self, now: Instant) -> Vec<SweepAction> {
        self.lock()
            .values()
            .filter(|slot| !slot.closing)
            .filter_map(|slot| {
                let idle = now.saturating_duration_since(slot.session.last_activity_at);
                if idle > self.config.idle_timeout {
                    Some(SweepAction::Evict(slot.session.id))
                } else if idle > self.config.heartbeat_after {
                    Some(SweepAction::Ping(slot.session.id))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Deliver sweep decisions to the socket tasks.
    pub fn apply(&self, actions: &[SweepAction], now: Instant) {
        let mut evicted = Vec::new();
        {
            let mut slots = self.lock();
            for action in actions {
                match *action {
                    SweepAction::Ping(id) => {
                        if let Some(slot) = slots.get(&id) {
                            if slot.commands.try_send(ConnectionCommand::Ping).is_err() {
                                tracing::debug!("Heartbeat for {} not delivered", id);
                            }
                        }
                    }
                    SweepAction::Evict(id) => {
                        if let Some(slot) = slots.get_mut(&id) {
                            let close = ConnectionCommand::Close {
                                code: CLOSE_NORMAL,
                                reason: "idle timeout",
                            };
                            // Left open on failure so the next sweep tries again.
                            if let Err(e) = slot.commands.try_send(close) {
                                tracing::warn!("Idle close for {} not delivered: {}", id, e);
                                continue;
                            }
                            slot.closing = true;
                            let idle_secs = now
                                .saturating_duration_since(slot.session.last_activity_at)
                                .as_secs();
                            evicted.push((id, idle_secs));
                        }
                    }
                }
            }
        }

        for (id, idle_secs) in evicted {
            tracing::info!("Evicting idle WebSocket connection {} ({}s idle)", id, idle_secs);
            self.emit(ConnectionEvent::Evicted { id, idle_secs });
        }
    }

    /// Periodic sweep until `cancel` fires.
    pub fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let actions = self.sweep_at(now);
                        if !actions.is_empty() {
                            tracing::debug!("Lifecycle sweep: {} actions", actions.len());
                        }
                        self.apply(&actions, now);
                    }
                }
            }
            tracing::debug!("Lifecycle sweeper stopped");
        })
    }

    /// Ask every open connection to close with code 1000 and wait for the
    /// socket tasks to finish. Each task waits up to `close_grace` for the
    /// peer's acknowledgment before dropping its socket.
    pub async fn shutdown(&self) {
        let open = {
            let mut slots = self.lock();
            for slot in slots.values_mut() {
                slot.closing = true;
                if slot
                    .commands
                    .try_send(ConnectionCommand::Close {
                        code: CLOSE_NORMAL,
                        reason: "server shutdown",
                    })
                    .is_err()
                {
                    tracing::warn!("Close command for {} not delivered", slot.session.id);
                }
            }
            slots.len()
        };
        self.emit(ConnectionEvent::ShutdownStarted { open });
        tracing::info!("Closing {} WebSocket connections", open);

        self.tracker.close();
        let deadline = self.config.close_grace + Duration::from_secs(1);
        if tokio::time::timeout(deadline, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                "{} WebSocket tasks still running after {:?}",
                self.tracker.len(),
                deadline
            );
        }
    }

    pub(crate) fn closed(&self, id: ConnectionId, reason: &str) {
        if let Some(session) = self.remove(id) {
            tracing::info!("WebSocket connection {} closed: {}", id, reason);
            self.emit(ConnectionEvent::Closed {
                id,
                messages: session.message_count,
                reason: reason.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_data_services::event_channel;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(LifecycleConfig::default())
    }

    #[test]
    fn test_fresh_connection_needs_nothing() {
        let m = manager();
        let (tx, _rx) = mpsc::channel(4);
        let t0 = Instant::now();
        m.register_at(tx, t0);
        assert!(m.sweep_at(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_heartbeat_then_eviction() {
        let m = manager();
        let (tx, _rx) = mpsc::channel(4);
        let t0 = Instant::now();
        let id = m.register_at(tx, t0);

        assert_eq!(m.sweep_at(t0 + Duration::from_secs(31)), vec![SweepAction::Ping(id)]);
        assert_eq!(m.sweep_at(t0 + Duration::from_secs(301)), vec![SweepAction::Evict(id)]);
    }

    #[test]
    fn test_activity_resets_idle_but_pong_does_not() {
        let m = manager();
        let (tx, _rx) = mpsc::channel(4);
        let t0 = Instant::now();
        let id = m.register_at(tx, t0);

        m.record_pong(id, t0 + Duration::from_secs(250));
        assert_eq!(m.sweep_at(t0 + Duration::from_secs(301)), vec![SweepAction::Evict(id)]);

        m.record_message(id, t0 + Duration::from_secs(290));
        assert!(m.sweep_at(t0 + Duration::from_secs(301)).is_empty());
    }

    #[tokio::test]
    async fn test_undelivered_eviction_is_retried_next_sweep() {
        let m = manager();
        let (tx, mut rx) = mpsc::channel(1);
        let t0 = Instant::now();
        let id = m.register_at(tx.clone(), t0);

        // Socket task is behind: a heartbeat already fills the queue.
        tx.try_send(ConnectionCommand::Ping).unwrap();
        let later = t0 + Duration::from_secs(400);
        m.apply(&[SweepAction::Evict(id)], later);

        let next = later + Duration::from_secs(30);
        assert_eq!(m.sweep_at(next), vec![SweepAction::Evict(id)]);

        assert_eq!(rx.recv().await, Some(ConnectionCommand::Ping));
        m.apply(&[SweepAction::Evict(id)], next);
        assert_eq!(
            rx.recv().await,
            Some(ConnectionCommand::Close {
                code: CLOSE_NORMAL,
                reason: "idle timeout"
            })
        );
        assert!(m.sweep_at(next + Duration::from_secs(30)).is_empty());
    }

    #[tokio::test]
    async fn test_eviction_sends_close_1000_once() {
        let (events, mut event_rx) = event_channel(8);
        let m = manager().with_events(events);
        let (tx, mut rx) = mpsc::channel(4);
        let t0 = Instant::now();
        let id = m.register_at(tx, t0);
        let later = t0 + Duration::from_secs(400);

        let actions = m.sweep_at(later);
        m.apply(&actions, later);

        assert_eq!(
            rx.recv().await,
            Some(ConnectionCommand::Close {
                code: CLOSE_NORMAL,
                reason: "idle timeout"
            })
        );
        assert!(m.sweep_at(later).is_empty());

        assert_eq!(event_rx.recv().await, Some(ConnectionEvent::Opened { id }));
        assert_eq!(
            event_rx.recv().await,
            Some(ConnectionEvent::Evicted { id, idle_secs: 400 })
        );
    }

    #[tokio::test]
    async fn test_ping_command_delivered() {
        let m = manager();
        let (tx, mut rx) = mpsc::channel(4);
        let t0 = Instant::now();
        let id = m.register_at(tx, t0);
        m.apply(&[SweepAction::Ping(id)], t0);
        assert_eq!(rx.recv().await, Some(ConnectionCommand::Ping));
    }

    #[test]
    fn test_soft_rate_limit_in_first_window() {
        let m = manager();
        let (tx, _rx) = mpsc::channel(4);
        let t0 = Instant::now();
        let id = m.register_at(tx, t0);

        let at = t0 + Duration::from_secs(5);
        for _ in 0..100 {
            assert_eq!(m.record_message(id, at), MessageAdmission::Accepted);
        }
        assert_eq!(m.record_message(id, at), MessageAdmission::RateLimited);

        // The limit only applies to the connection's first minute.
        assert_eq!(
            m.record_message(id, t0 + Duration::from_secs(61)),
            MessageAdmission::Accepted
        );
        assert_eq!(m.session(id).unwrap().message_count, 102);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let m = manager();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        m.register(tx1);
        m.register(tx2);

        m.shutdown().await;

        let expected = Some(ConnectionCommand::Close {
            code: CLOSE_NORMAL,
            reason: "server shutdown",
        });
        assert_eq!(rx1.recv().await, expected);
        assert_eq!(rx2.recv().await, expected);
        assert!(m.tracker().is_closed());
    }

    #[test]
    fn test_closed_removes_session() {
        let m = manager();
        let (tx, _rx) = mpsc::channel(4);
        let id = m.register(tx);
        assert_eq!(m.connection_count(), 1);
        m.closed(id, "peer closed");
        assert_eq!(m.connection_count(), 0);
        assert!(m.session_info(id, Instant::now()).is_none());
    }
}
