//! Process-wide shared state (§9 "Ambient mutable registries" -- injected
//! into the server value instead of left as package-level globals).

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use chathub_core::directory::{PendingChallenges, RateLimiter, REGISTER_RATE_LIMIT, REGISTER_RATE_WINDOW_MS};
use chathub_core::memdb::SessionRecord;
use chathub_core::model::{ByteSink, Session, Transport};
use chathub_core::{Broadcaster, MemDb, SessionManager, SessionManagerLimits};

use crate::config::Config;

pub struct AppState {
    pub config: Config,
    pub memdb: Arc<MemDb>,
    pub sessions: Arc<SessionManager>,
    pub broadcaster: Arc<Broadcaster>,
    pub db_pool: PgPool,
    pub register_rate_limiter: RateLimiter,
    pub pending_challenges: PendingChallenges,
    /// In-process session id -> the `(hostname, port)` it registered with
    /// `REGISTER_SERVER`, so a later `HEARTBEAT` on the same connection can
    /// find the right `discovered_servers` row to update (§4.6).
    pub directory_registrations: RwLock<HashMap<u64, (String, u16)>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
    started_at_ms: i64,
}

impl AppState {
    pub fn new(config: Config, db_pool: PgPool, started_at_ms: i64) -> Arc<Self> {
        let sessions = Arc::new(SessionManager::new(SessionManagerLimits::default()));
        let broadcaster = Arc::new(Broadcaster::new(sessions.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            config,
            memdb: Arc::new(MemDb::new()),
            sessions,
            broadcaster,
            db_pool,
            register_rate_limiter: RateLimiter::new(REGISTER_RATE_LIMIT, REGISTER_RATE_WINDOW_MS),
            pending_challenges: PendingChallenges::default(),
            directory_registrations: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            started_at_ms,
        })
    }

    pub fn uptime_seconds(&self, now_ms: i64) -> u64 {
        ((now_ms - self.started_at_ms).max(0) / 1000) as u64
    }

    /// A process-unique, human-legible session identifier for the durable
    /// `sessions` table; distinct from the in-process `Session::id`.
    pub fn next_db_session_id(&self) -> String {
        format!("sess-{}", Uuid::new_v4())
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Allocates a session end to end (§4.3 `CreateSession`): a fresh
    /// in-process id from the session manager, a process-unique
    /// `db_session_id`, and a buffered bookkeeping row in MemDB. Shared by
    /// all three transports so they only differ in how `conn` talks to the
    /// wire.
    pub async fn create_session(
        self: &Arc<Self>,
        remote_addr: String,
        transport: Transport,
        conn: Box<dyn ByteSink>,
    ) -> Arc<Session> {
        let db_session_id = self.next_db_session_id();
        let now = now_ms();
        self.memdb
            .upsert_session_record(SessionRecord {
                db_session_id: db_session_id.clone(),
                user_id: None,
                remote_addr: remote_addr.clone(),
                transport,
                started_at: now,
                last_activity: now,
            })
            .await;
        self.sessions
            .create_session(db_session_id, remote_addr, transport, conn, now)
            .await
    }

    /// One pass of the idle-session sweep (§5 "Idle cleanup", §8 scenario
    /// S6): removes every session whose `last_activity` is older than
    /// `limits.session_timeout_seconds`. Returns the number removed. Split
    /// out from the periodic ticker in `main` so a test can trigger a sweep
    /// on demand instead of waiting out the real 30 s interval.
    pub async fn sweep_idle_sessions(self: &Arc<Self>) -> u32 {
        let timeout_ms = (self.config.limits.session_timeout_seconds as i64) * 1000;
        let now = now_ms();
        let mut removed = 0u32;
        for session in self.sessions.get_all_sessions().await {
            let last_activity = session.state.read().await.last_activity;
            if now - last_activity > timeout_ms {
                self.sessions.remove_session(session.id).await;
                removed += 1;
            }
        }
        removed
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
