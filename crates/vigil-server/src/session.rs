use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing;

/// Capacity of each session's outbound frame queue.
pub const SEND_QUEUE_CAPACITY: usize = 256;
/// Silence after which a session is considered dead and evicted.
pub const LIVENESS_TIMEOUT_MS: i64 = 120_000;
/// Cadence of the supervisor's liveness sweep.
pub const SUPERVISOR_TICK_SECS: u64 = 30;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Probe connectivity transition, fed into the alert evaluator as the
/// network_down signal.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub probe_id: String,
    pub online: bool,
    pub at_ms: i64,
}

/// One live probe connection. The session owns the bounded send queue and
/// a cancellation token shared by its read and write pumps; `close` is a
/// one-shot guard so either side may initiate teardown exactly once.
pub struct Session {
    pub probe_id: String,
    tx: mpsc::Sender<String>,
    last_active_ms: AtomicI64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NotFound,
    QueueFull,
}

impl Session {
    pub fn new(probe_id: &str) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            probe_id: probe_id.to_string(),
            tx,
            last_active_ms: AtomicI64::new(now_ms()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Refresh the liveness clock; called on every inbound frame and pong.
    pub fn touch(&self, at_ms: i64) {
        self.last_active_ms.fetch_max(at_ms, Ordering::Relaxed);
    }

    pub fn last_active_ms(&self) -> i64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }

    /// Non-blocking enqueue onto the send queue.
    pub fn enqueue(&self, frame: String) -> SendOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotFound,
        }
    }

    /// Close exactly once: cancels both pumps, which drop the socket halves.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Owns the set of live probe sessions. Register/unregister/eviction take
/// the write lock; send paths take read locks only and never block on the
/// socket (enqueue is non-blocking).
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    events: mpsc::Sender<StatusEvent>,
}

impl SessionManager {
    pub fn new(events: mpsc::Sender<StatusEvent>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            events,
        })
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, probe_id: &str, online: bool) {
        let event = StatusEvent {
            probe_id: probe_id.to_string(),
            online,
            at_ms: now_ms(),
        };
        if self.events.try_send(event).is_err() {
            tracing::warn!(probe_id = %probe_id, "status event queue full, dropping event");
        }
    }

    /// Insert a session, displacing (and closing) any prior session with
    /// the same probe id. Completes before returning.
    pub fn register(&self, session: Arc<Session>) {
        let displaced = {
            let mut sessions = self.write_sessions();
            sessions.insert(session.probe_id.clone(), session.clone())
        };
        if let Some(old) = displaced {
            tracing::info!(probe_id = %session.probe_id, "probe reconnected, closing old session");
            old.close();
        }
        tracing::info!(
            probe_id = %session.probe_id,
            total = self.count(),
            "probe connected"
        );
        self.emit(&session.probe_id, true);
    }

    /// Remove a session if it is still the registered one (identity check,
    /// not just id: a displaced session must not evict its replacement).
    pub fn unregister(&self, session: &Arc<Session>) {
        let removed = {
            let mut sessions = self.write_sessions();
            match sessions.get(&session.probe_id) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    sessions.remove(&session.probe_id)
                }
                _ => None,
            }
        };
        if let Some(removed) = removed {
            removed.close();
            tracing::info!(
                probe_id = %session.probe_id,
                total = self.count(),
                "probe disconnected"
            );
            self.emit(&session.probe_id, false);
        }
    }

    pub fn send_to(&self, probe_id: &str, frame: String) -> SendOutcome {
        let session = {
            let sessions = self.read_sessions();
            sessions.get(probe_id).cloned()
        };
        match session {
            Some(session) => {
                let outcome = session.enqueue(frame);
                if outcome == SendOutcome::QueueFull {
                    tracing::warn!(probe_id = %probe_id, "send queue full, dropping frame");
                }
                outcome
            }
            None => SendOutcome::NotFound,
        }
    }

    /// Best-effort fan-out; full queues drop the frame for that session.
    pub fn broadcast(&self, frame: &str) {
        let sessions: Vec<Arc<Session>> = {
            let guard = self.read_sessions();
            guard.values().cloned().collect()
        };
        for session in sessions {
            if session.enqueue(frame.to_string()) == SendOutcome::QueueFull {
                tracing::warn!(
                    probe_id = %session.probe_id,
                    "send queue full, dropping broadcast frame"
                );
            }
        }
    }

    pub fn contains(&self, probe_id: &str) -> bool {
        self.read_sessions().contains_key(probe_id)
    }

    pub fn clients(&self) -> Vec<String> {
        self.read_sessions().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read_sessions().len()
    }

    /// Evict sessions silent for longer than the liveness timeout.
    /// Candidates are collected under the read lock, then re-verified under
    /// the write lock to avoid racing a concurrent re-registration.
    pub fn evict_stale(&self, now_ms: i64) -> usize {
        let stale: Vec<Arc<Session>> = {
            let sessions = self.read_sessions();
            sessions
                .values()
                .filter(|s| now_ms - s.last_active_ms() >= LIVENESS_TIMEOUT_MS)
                .cloned()
                .collect()
        };

        let mut evicted = 0;
        for session in stale {
            let removed = {
                let mut sessions = self.write_sessions();
                match sessions.get(&session.probe_id) {
                    Some(current)
                        if Arc::ptr_eq(current, &session)
                            && now_ms - current.last_active_ms() >= LIVENESS_TIMEOUT_MS =>
                    {
                        sessions.remove(&session.probe_id)
                    }
                    _ => None,
                }
            };
            if let Some(removed) = removed {
                tracing::warn!(
                    probe_id = %removed.probe_id,
                    idle_ms = now_ms - removed.last_active_ms(),
                    "probe inactive, evicting session"
                );
                removed.close();
                self.emit(&removed.probe_id, false);
                evicted += 1;
            }
        }
        evicted
    }

    /// Close every session without emitting offline events; used on
    /// shutdown when the evaluator is stopping too.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut guard = self.write_sessions();
            guard.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close();
        }
    }

    /// Supervisor loop: liveness sweep every 30 s until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = interval(std::time::Duration::from_secs(SUPERVISOR_TICK_SECS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close_all();
                    tracing::info!("session supervisor stopped");
                    break;
                }
                _ = tick.tick() => {
                    self.evict_stale(now_ms());
                }
            }
        }
    }
}
