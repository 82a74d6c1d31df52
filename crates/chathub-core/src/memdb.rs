//! The in-memory mirror of persisted state (§4.2). Each table has its own
//! RW lock so reads never block writes to an unrelated table, and one
//! mutex per table lets independent tables make progress in parallel
//! (§5 "MemDB tables").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::model::{
    AdminAuditEntry, Ban, BanKind, Channel, ChannelType, DiscoveredServer, Message, Transport,
};

const NICKNAME_RE_MIN: usize = 3;
const NICKNAME_RE_MAX: usize = 20;
const CHANNEL_NAME_MIN: usize = 3;
const CHANNEL_NAME_MAX: usize = 50;

pub fn is_valid_nickname(nickname: &str) -> bool {
    let len = nickname.chars().count();
    (NICKNAME_RE_MIN..=NICKNAME_RE_MAX).contains(&len)
        && nickname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_channel_name(name: &str) -> bool {
    let len = name.chars().count();
    (CHANNEL_NAME_MIN..=CHANNEL_NAME_MAX).contains(&len)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A persisted bookkeeping record for a live connection; distinct from the
/// in-process [`crate::model::Session`], which is never itself persisted.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub db_session_id: String,
    pub user_id: Option<u64>,
    pub remote_addr: String,
    pub transport: Transport,
    pub started_at: i64,
    pub last_activity: i64,
}

#[derive(Default)]
struct Dirty {
    channels: RwLock<std::collections::HashSet<u64>>,
    messages: RwLock<std::collections::HashSet<u64>>,
    users: RwLock<std::collections::HashSet<u64>>,
    bans: RwLock<std::collections::HashSet<u64>>,
    audit_log: RwLock<std::collections::HashSet<u64>>,
}

pub struct MemDb {
    channels: RwLock<HashMap<u64, Channel>>,
    next_channel_id: AtomicU64,

    messages: RwLock<HashMap<u64, Message>>,
    messages_by_channel: RwLock<HashMap<u64, Vec<u64>>>,
    next_message_id: AtomicU64,

    users: RwLock<HashMap<u64, crate::model::User>>,
    users_by_nickname: RwLock<HashMap<String, u64>>,
    next_user_id: AtomicU64,

    sessions: RwLock<HashMap<String, SessionRecord>>,

    bans: RwLock<HashMap<u64, Ban>>,
    next_ban_id: AtomicU64,

    discovered_servers: RwLock<HashMap<(String, u16), DiscoveredServer>>,

    audit_log: RwLock<HashMap<u64, AdminAuditEntry>>,
    next_audit_id: AtomicU64,

    dirty: Dirty,
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDb {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_channel_id: AtomicU64::new(1),
            messages: RwLock::new(HashMap::new()),
            messages_by_channel: RwLock::new(HashMap::new()),
            next_message_id: AtomicU64::new(1),
            users: RwLock::new(HashMap::new()),
            users_by_nickname: RwLock::new(HashMap::new()),
            next_user_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
            bans: RwLock::new(HashMap::new()),
            next_ban_id: AtomicU64::new(1),
            discovered_servers: RwLock::new(HashMap::new()),
            audit_log: RwLock::new(HashMap::new()),
            next_audit_id: AtomicU64::new(1),
            dirty: Dirty::default(),
        }
    }

    // -- Channels ----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_channel(
        &self,
        name: &str,
        display_name: &str,
        description: Option<String>,
        channel_type: ChannelType,
        retention_hours: u32,
        created_by: Option<u64>,
        is_private: bool,
        now: i64,
    ) -> Result<Channel, CoreError> {
        if !is_valid_channel_name(name) {
            return Err(CoreError::ChannelNameTaken);
        }
        let mut channels = self.channels.write().await;
        if channels.values().any(|c| c.name == name) {
            return Err(CoreError::ChannelNameTaken);
        }
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = Channel {
            id,
            name: name.to_owned(),
            display_name: display_name.to_owned(),
            description,
            channel_type,
            retention_hours: retention_hours.clamp(1, 8760),
            created_by,
            created_at: now,
            is_private,
        };
        channels.insert(id, channel.clone());
        drop(channels);
        self.dirty.channels.write().await.insert(id);
        Ok(channel)
    }

    pub async fn get_channel(&self, id: u64) -> Option<Channel> {
        self.channels.read().await.get(&id).cloned()
    }

    pub async fn channel_exists(&self, id: u64) -> bool {
        self.channels.read().await.contains_key(&id)
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.channels.read().await.values().cloned().collect()
    }

    pub async fn count_channels(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn delete_channel(&self, id: u64) -> Result<(), CoreError> {
        let mut channels = self.channels.write().await;
        if channels.remove(&id).is_none() {
            return Err(CoreError::ChannelNotFound);
        }
        drop(channels);

        let mut by_channel = self.messages_by_channel.write().await;
        if let Some(ids) = by_channel.remove(&id) {
            let mut messages = self.messages.write().await;
            for msg_id in ids {
                messages.remove(&msg_id);
            }
        }
        Ok(())
    }

    // -- Messages ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn post_message(
        &self,
        channel_id: u64,
        subchannel_id: Option<u64>,
        parent_id: Option<u64>,
        author_user_id: Option<u64>,
        author_nickname: &str,
        content: &str,
        max_message_length: usize,
        now: i64,
    ) -> Result<Message, CoreError> {
        if content.len() > max_message_length {
            return Err(CoreError::MessageTooLong);
        }
        let channel = self
            .get_channel(channel_id)
            .await
            .ok_or(CoreError::ChannelNotFound)?;

        let thread_root_id = if let Some(parent_id) = parent_id {
            if channel.channel_type == ChannelType::Chat {
                return Err(CoreError::ChatDoesNotThread);
            }
            let messages = self.messages.read().await;
            let parent = messages
                .get(&parent_id)
                .filter(|m| m.channel_id == channel_id)
                .ok_or(CoreError::ParentNotFound)?;
            Some(parent.thread_root_id.unwrap_or(parent.id))
        } else {
            None
        };

        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let message = Message {
            id,
            channel_id,
            subchannel_id,
            parent_id,
            thread_root_id,
            author_user_id,
            author_nickname: author_nickname.to_owned(),
            content: content.to_owned(),
            created_at: now,
            edited_at: None,
            deleted_at: None,
        };

        self.messages.write().await.insert(id, message.clone());
        self.messages_by_channel
            .write()
            .await
            .entry(channel_id)
            .or_default()
            .push(id);
        self.dirty.messages.write().await.insert(id);

        Ok(message)
    }

    async fn update_message_inner(
        &self,
        message_id: u64,
        author_user_id: Option<u64>,
        content: &str,
        max_message_length: usize,
        now: i64,
        enforce_ownership: bool,
    ) -> Result<Message, CoreError> {
        if content.len() > max_message_length {
            return Err(CoreError::MessageTooLong);
        }
        let mut messages = self.messages.write().await;
        let message = messages
            .get_mut(&message_id)
            .ok_or(CoreError::MessageNotFound)?;
        if message.is_deleted() {
            return Err(CoreError::AlreadyDeleted);
        }
        if enforce_ownership && message.author_user_id != author_user_id {
            return Err(CoreError::PermissionDenied);
        }
        message.content = content.to_owned();
        message.edited_at = Some(now);
        let out = message.clone();
        drop(messages);
        self.dirty.messages.write().await.insert(message_id);
        Ok(out)
    }

    pub async fn update_message(
        &self,
        message_id: u64,
        author_user_id: Option<u64>,
        content: &str,
        max_message_length: usize,
        now: i64,
    ) -> Result<Message, CoreError> {
        self.update_message_inner(message_id, author_user_id, content, max_message_length, now, true)
            .await
    }

    pub async fn admin_update_message(
        &self,
        message_id: u64,
        content: &str,
        max_message_length: usize,
        now: i64,
    ) -> Result<Message, CoreError> {
        self.update_message_inner(message_id, None, content, max_message_length, now, false)
            .await
    }

    async fn soft_delete_inner(
        &self,
        message_id: u64,
        author_user_id: Option<u64>,
        now: i64,
        enforce_ownership: bool,
    ) -> Result<Message, CoreError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .get_mut(&message_id)
            .ok_or(CoreError::MessageNotFound)?;
        if message.is_deleted() {
            return Err(CoreError::AlreadyDeleted);
        }
        if enforce_ownership && message.author_user_id != author_user_id {
            return Err(CoreError::PermissionDenied);
        }
        message.deleted_at = Some(now);
        let out = message.clone();
        drop(messages);
        self.dirty.messages.write().await.insert(message_id);
        Ok(out)
    }

    pub async fn soft_delete_message(
        &self,
        message_id: u64,
        author_user_id: Option<u64>,
        now: i64,
    ) -> Result<Message, CoreError> {
        self.soft_delete_inner(message_id, author_user_id, now, true).await
    }

    pub async fn admin_soft_delete_message(
        &self,
        message_id: u64,
        now: i64,
    ) -> Result<Message, CoreError> {
        self.soft_delete_inner(message_id, None, now, false).await
    }

    pub async fn get_message(&self, message_id: u64) -> Option<Message> {
        self.messages.read().await.get(&message_id).cloned()
    }

    /// Count of replies under `thread_root_id`, excluding tombstones when
    /// `include_tombstones` is false (§3: "reply counts exclude tombstones
    /// only when the UI requests").
    pub async fn count_replies(&self, thread_root_id: u64, include_tombstones: bool) -> usize {
        self.messages
            .read()
            .await
            .values()
            .filter(|m| m.thread_root_id == Some(thread_root_id))
            .filter(|m| include_tombstones || !m.is_deleted())
            .count()
    }

    pub async fn list_root_messages(
        &self,
        channel_id: u64,
        limit: u16,
        before: Option<i64>,
        after: Option<i64>,
    ) -> Vec<Message> {
        self.list_channel_messages(channel_id, limit, before, after, |m| {
            m.parent_id.is_none()
        })
        .await
    }

    pub async fn list_thread_replies(
        &self,
        channel_id: u64,
        thread_root_id: u64,
        limit: u16,
        before: Option<i64>,
        after: Option<i64>,
    ) -> Vec<Message> {
        self.list_channel_messages(channel_id, limit, before, after, |m| {
            m.thread_root_id == Some(thread_root_id)
        })
        .await
    }

    async fn list_channel_messages(
        &self,
        channel_id: u64,
        limit: u16,
        before: Option<i64>,
        after: Option<i64>,
        predicate: impl Fn(&Message) -> bool,
    ) -> Vec<Message> {
        let by_channel = self.messages_by_channel.read().await;
        let Some(ids) = by_channel.get(&channel_id) else {
            return Vec::new();
        };
        let messages = self.messages.read().await;
        let mut out: Vec<Message> = ids
            .iter()
            .filter_map(|id| messages.get(id))
            .filter(|m| predicate(m))
            .filter(|m| before.is_none_or(|b| m.created_at < b))
            .filter(|m| after.is_none_or(|a| m.created_at > a))
            .cloned()
            .collect();
        out.truncate(limit as usize);
        out
    }

    // -- Users -----------------------------------------------------------

    pub async fn create_user(
        &self,
        nickname: &str,
        password_hash: &str,
        now: i64,
    ) -> Result<crate::model::User, CoreError> {
        if !is_valid_nickname(nickname) {
            return Err(CoreError::InvalidNickname);
        }
        let mut by_nick = self.users_by_nickname.write().await;
        if by_nick.contains_key(nickname) {
            return Err(CoreError::NicknameTaken);
        }
        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        let user = crate::model::User {
            id,
            nickname: nickname.to_owned(),
            password_hash: password_hash.to_owned(),
            user_flags: 0,
            created_at: now,
            last_seen: now,
        };
        by_nick.insert(nickname.to_owned(), id);
        drop(by_nick);
        self.users.write().await.insert(id, user.clone());
        self.dirty.users.write().await.insert(id);
        Ok(user)
    }

    pub async fn get_user(&self, id: u64) -> Option<crate::model::User> {
        self.users.read().await.get(&id).cloned()
    }

    pub async fn get_user_by_nickname(&self, nickname: &str) -> Option<crate::model::User> {
        let id = *self.users_by_nickname.read().await.get(nickname)?;
        self.get_user(id).await
    }

    pub async fn touch_user_last_seen(&self, id: u64, now: i64) {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.last_seen = now;
        }
    }

    // -- Session bookkeeping ------------------------------------------------

    pub async fn upsert_session_record(&self, record: SessionRecord) {
        self.sessions
            .write()
            .await
            .insert(record.db_session_id.clone(), record);
    }

    pub async fn touch_session_record(&self, db_session_id: &str, now: i64) {
        if let Some(record) = self.sessions.write().await.get_mut(db_session_id) {
            record.last_activity = now;
        }
    }

    pub async fn remove_session_record(&self, db_session_id: &str) {
        self.sessions.write().await.remove(db_session_id);
    }

    // -- Bans --------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_ban(
        &self,
        kind: BanKind,
        user_id: Option<u64>,
        nickname: Option<String>,
        ip_cidr: Option<String>,
        reason: String,
        shadowban: bool,
        banned_until: Option<i64>,
        banned_by: Option<u64>,
        now: i64,
    ) -> Ban {
        let id = self.next_ban_id.fetch_add(1, Ordering::Relaxed);
        let ban = Ban {
            id,
            kind,
            user_id,
            nickname,
            ip_cidr,
            reason,
            shadowban,
            banned_at: now,
            banned_until,
            banned_by,
        };
        self.bans.write().await.insert(id, ban.clone());
        self.dirty.bans.write().await.insert(id);
        ban
    }

    pub async fn remove_ban(&self, ban_id: u64) -> Result<(), CoreError> {
        self.bans
            .write()
            .await
            .remove(&ban_id)
            .map(|_| ())
            .ok_or(CoreError::UserNotFound)
    }

    pub async fn find_active_ban_for_user(
        &self,
        user_id: u64,
        nickname: &str,
        now: i64,
    ) -> Option<Ban> {
        self.bans
            .read()
            .await
            .values()
            .find(|b| {
                b.kind == BanKind::User
                    && (b.user_id == Some(user_id) || b.nickname.as_deref() == Some(nickname))
                    && b.banned_until.is_none_or(|until| until > now)
            })
            .cloned()
    }

    pub async fn list_bans(&self) -> Vec<Ban> {
        self.bans.read().await.values().cloned().collect()
    }

    // -- Directory -----------------------------------------------------------

    pub async fn upsert_discovered_server(&self, server: DiscoveredServer) {
        self.discovered_servers
            .write()
            .await
            .insert((server.hostname.clone(), server.port), server);
    }

    pub async fn get_discovered_server(&self, hostname: &str, port: u16) -> Option<DiscoveredServer> {
        self.discovered_servers
            .read()
            .await
            .get(&(hostname.to_owned(), port))
            .cloned()
    }

    pub async fn list_discovered_servers(&self, limit: usize) -> Vec<DiscoveredServer> {
        let mut servers: Vec<_> = self
            .discovered_servers
            .read()
            .await
            .values()
            .cloned()
            .collect();
        servers.sort_by(|a, b| b.last_heartbeat_at.cmp(&a.last_heartbeat_at));
        servers.truncate(limit);
        servers
    }

    pub async fn prune_stale_servers(&self, now: i64, max_silence_secs: i64) {
        self.discovered_servers.write().await.retain(|_, s| {
            now - s.last_heartbeat_at < max_silence_secs * 1000
        });
    }

    // -- Admin audit log -----------------------------------------------------

    pub async fn record_admin_action(
        &self,
        admin_user_id: Option<u64>,
        action: &str,
        target: Option<String>,
        detail: Option<String>,
        now: i64,
    ) -> AdminAuditEntry {
        let id = self.next_audit_id.fetch_add(1, Ordering::Relaxed);
        let entry = AdminAuditEntry {
            id,
            admin_user_id,
            action: action.to_owned(),
            target,
            detail,
            created_at: now,
        };
        self.audit_log.write().await.insert(id, entry.clone());
        self.dirty.audit_log.write().await.insert(id);
        entry
    }

    pub async fn list_admin_audit_log(&self) -> Vec<AdminAuditEntry> {
        self.audit_log.read().await.values().cloned().collect()
    }

    // -- Snapshot / write-behind --------------------------------------------

    /// Clears and returns the set of table ids touched since the last call;
    /// the caller's background committer (see [`crate::durable::DurableStore`])
    /// persists these and any dependent rows in one transaction.
    pub async fn take_dirty(&self) -> DirtySnapshot {
        let channel_ids: Vec<u64> = self.dirty.channels.write().await.drain().collect();
        let message_ids: Vec<u64> = self.dirty.messages.write().await.drain().collect();
        let user_ids: Vec<u64> = self.dirty.users.write().await.drain().collect();
        let ban_ids: Vec<u64> = self.dirty.bans.write().await.drain().collect();
        let audit_ids: Vec<u64> = self.dirty.audit_log.write().await.drain().collect();

        let channels = self.channels.read().await;
        let messages = self.messages.read().await;
        let users = self.users.read().await;
        let bans = self.bans.read().await;
        let audit_log = self.audit_log.read().await;

        DirtySnapshot {
            channels: channel_ids.iter().filter_map(|id| channels.get(id)).cloned().collect(),
            messages: message_ids.iter().filter_map(|id| messages.get(id)).cloned().collect(),
            users: user_ids.iter().filter_map(|id| users.get(id)).cloned().collect(),
            bans: ban_ids.iter().filter_map(|id| bans.get(id)).cloned().collect(),
            audit_log: audit_ids.iter().filter_map(|id| audit_log.get(id)).cloned().collect(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DirtySnapshot {
    pub channels: Vec<Channel>,
    pub messages: Vec<Message>,
    pub users: Vec<crate::model::User>,
    pub bans: Vec<Ban>,
    pub audit_log: Vec<AdminAuditEntry>,
}

impl DirtySnapshot {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
            && self.messages.is_empty()
            && self.users.is_empty()
            && self.bans.is_empty()
            && self.audit_log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TOMBSTONE;

    fn chat_channel() -> (ChannelType, u32) {
        (ChannelType::Chat, 24)
    }

    #[tokio::test]
    async fn post_message_ids_are_monotonic_within_a_channel() {
        let db = MemDb::new();
        let (ty, retention) = chat_channel();
        let channel = db
            .create_channel("general", "General", None, ty, retention, None, false, 0)
            .await
            .unwrap();

        let m1 = db
            .post_message(channel.id, None, None, None, "alice", "hi", 1000, 1)
            .await
            .unwrap();
        let m2 = db
            .post_message(channel.id, None, None, None, "bob", "yo", 1000, 2)
            .await
            .unwrap();
        assert!(m2.id > m1.id);
    }

    #[tokio::test]
    async fn chat_channel_rejects_threaded_replies() {
        let db = MemDb::new();
        let (ty, retention) = chat_channel();
        let channel = db
            .create_channel("general", "General", None, ty, retention, None, false, 0)
            .await
            .unwrap();
        let root = db
            .post_message(channel.id, None, None, None, "alice", "hi", 1000, 1)
            .await
            .unwrap();

        let err = db
            .post_message(
                channel.id,
                None,
                Some(root.id),
                None,
                "bob",
                "reply",
                1000,
                2,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ChatDoesNotThread));
    }

    #[tokio::test]
    async fn forum_replies_flatten_to_a_single_thread_root() {
        let db = MemDb::new();
        let channel = db
            .create_channel("help", "Help", None, ChannelType::Forum, 24, None, false, 0)
            .await
            .unwrap();
        let root = db
            .post_message(channel.id, None, None, None, "alice", "root", 1000, 1)
            .await
            .unwrap();
        let reply1 = db
            .post_message(channel.id, None, Some(root.id), None, "bob", "r1", 1000, 2)
            .await
            .unwrap();
        assert_eq!(reply1.thread_root_id, Some(root.id));

        let reply2 = db
            .post_message(
                channel.id,
                None,
                Some(reply1.id),
                None,
                "carol",
                "r2",
                1000,
                3,
            )
            .await
            .unwrap();
        // Replying to a reply still resolves to the same root, not reply1.
        assert_eq!(reply2.thread_root_id, Some(root.id));
    }

    #[tokio::test]
    async fn soft_deleted_message_keeps_its_row_but_shows_a_tombstone() {
        let db = MemDb::new();
        let channel = db
            .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
            .await
            .unwrap();
        let msg = db
            .post_message(channel.id, None, None, Some(1), "alice", "hi", 1000, 1)
            .await
            .unwrap();
        let deleted = db.soft_delete_message(msg.id, Some(1), 5).await.unwrap();
        assert_eq!(deleted.deleted_at, Some(5));
        assert_eq!(deleted.display_content(), TOMBSTONE);

        let err = db.soft_delete_message(msg.id, Some(1), 6).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyDeleted));
    }

    #[tokio::test]
    async fn message_over_the_length_limit_is_rejected() {
        let db = MemDb::new();
        let channel = db
            .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
            .await
            .unwrap();
        let ok = db
            .post_message(channel.id, None, None, None, "alice", "1234", 4, 1)
            .await;
        assert!(ok.is_ok());
        let err = db
            .post_message(channel.id, None, None, None, "alice", "12345", 4, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MessageTooLong));
    }

    #[tokio::test]
    async fn delete_channel_cascades_to_its_messages() {
        let db = MemDb::new();
        let channel = db
            .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
            .await
            .unwrap();
        let msg = db
            .post_message(channel.id, None, None, None, "alice", "hi", 1000, 1)
            .await
            .unwrap();
        db.delete_channel(channel.id).await.unwrap();
        assert!(db.get_message(msg.id).await.is_none());
        assert!(matches!(
            db.delete_channel(channel.id).await.unwrap_err(),
            CoreError::ChannelNotFound
        ));
    }
}
