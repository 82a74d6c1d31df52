//! Domain entities for the hub's in-memory state (§3).

use std::collections::HashSet;

use tokio::sync::RwLock;

use chathub_protocol::Frame;

pub const ADMIN_FLAG: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Chat,
    Forum,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub channel_type: ChannelType,
    pub retention_hours: u32,
    pub created_by: Option<u64>,
    pub created_at: i64,
    pub is_private: bool,
}

/// Content replacing a soft-deleted message's text (§3 Message).
pub const TOMBSTONE: &str = "[deleted]";

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub channel_id: u64,
    pub subchannel_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub thread_root_id: Option<u64>,
    pub author_user_id: Option<u64>,
    pub author_nickname: String,
    pub content: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Content as seen by clients: the tombstone once soft-deleted.
    pub fn display_content(&self) -> &str {
        if self.is_deleted() {
            TOMBSTONE
        } else {
            &self.content
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub nickname: String,
    /// bcrypt(client-supplied Argon2id hash); empty for SSH-only accounts.
    pub password_hash: String,
    pub user_flags: u32,
    pub created_at: i64,
    pub last_seen: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.user_flags & ADMIN_FLAG != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Ssh,
    WebSocket,
}

/// Structural key for a subscription scope; see the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSub {
    pub channel_id: u64,
    pub subchannel_id: Option<u64>,
}

impl ChannelSub {
    pub fn whole_channel(channel_id: u64) -> Self {
        Self {
            channel_id,
            subchannel_id: None,
        }
    }
}

/// The mutable fields of a [`Session`], behind the session's own RW lock
/// (§5: `Session.mu` is the outermost lock in the ordering).
#[derive(Debug, Default)]
pub struct SessionState {
    pub nickname: String,
    pub user_id: Option<u64>,
    pub joined_channel: Option<u64>,
    pub user_flags: u32,
    pub shadowbanned: bool,
    pub subscribed_threads: HashSet<u64>,
    pub subscribed_channels: HashSet<ChannelSub>,
    pub last_activity: i64,
    pub last_persisted_activity: i64,
}

/// A byte-sink abstraction over the three transports (TCP, SSH, WebSocket).
///
/// Each transport adapter wraps its own channel/stream primitive and owns a
/// write mutex internally so concurrent broadcasts and direct replies never
/// interleave frames on the wire (§9 "Polymorphism over transports").
#[async_trait::async_trait]
pub trait ByteSink: Send + Sync {
    async fn write_frame(&self, frame: &Frame) -> std::io::Result<()>;
    async fn close(&self);
}

/// A live client connection. The session manager holds the only strong
/// reference to `conn`; state mutation goes through `state`'s RW lock.
pub struct Session {
    pub id: u64,
    pub db_session_id: String,
    pub remote_addr: String,
    pub transport: Transport,
    pub state: RwLock<SessionState>,
    pub conn: Box<dyn ByteSink>,
}

impl Session {
    pub fn new(
        id: u64,
        db_session_id: String,
        remote_addr: String,
        transport: Transport,
        conn: Box<dyn ByteSink>,
    ) -> Self {
        Self {
            id,
            db_session_id,
            remote_addr,
            transport,
            state: RwLock::new(SessionState::default()),
            conn,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    User,
    Ip,
}

#[derive(Debug, Clone)]
pub struct Ban {
    pub id: u64,
    pub kind: BanKind,
    pub user_id: Option<u64>,
    pub nickname: Option<String>,
    pub ip_cidr: Option<String>,
    pub reason: String,
    pub shadowban: bool,
    pub banned_at: i64,
    pub banned_until: Option<i64>,
    pub banned_by: Option<u64>,
}

/// A row in `admin_audit_log` (§6 persisted state layout). Handlers call
/// [`crate::memdb::MemDb::record_admin_action`] for every ban/unban/admin
/// delete so the durable store keeps a trail even though the full
/// moderation command surface (bulk queries, pagination) is out of scope.
#[derive(Debug, Clone)]
pub struct AdminAuditEntry {
    pub id: u64,
    pub admin_user_id: Option<u64>,
    pub action: String,
    pub target: Option<String>,
    pub detail: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct DiscoveredServer {
    pub hostname: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u32,
    pub max_users: u32,
    pub uptime_seconds: u64,
    pub channel_count: u32,
    pub is_public: bool,
    pub last_heartbeat_at: i64,
    pub heartbeat_interval: u32,
}
