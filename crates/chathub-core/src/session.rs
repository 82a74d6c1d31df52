//! Session manager: owns live sessions and their forward + reverse
//! subscription indexes (§4.3).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::model::{ByteSink, ChannelSub, Session, Transport};

#[derive(Default)]
struct SubIndex {
    channel_subscribers: HashMap<ChannelSub, HashSet<u64>>,
    thread_subscribers: HashMap<u64, HashSet<u64>>,
}

pub struct SessionManagerLimits {
    pub max_thread_subs: usize,
    pub max_channel_subs: usize,
}

impl Default for SessionManagerLimits {
    fn default() -> Self {
        Self {
            max_thread_subs: 100,
            max_channel_subs: 100,
        }
    }
}

/// Owns every live [`Session`] plus the reverse subscription indexes used by
/// the broadcaster to find recipients in O(subscribers) (§4.3, §4.4).
///
/// Lock ordering (§5): `Session.mu` -> `sessions` -> `sub_index`. Operations
/// that touch a session's own subscription sets and the reverse index always
/// acquire the session lock first.
pub struct SessionManager {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    sub_index: RwLock<SubIndex>,
    next_session_id: AtomicU64,
    limits: SessionManagerLimits,
}

impl SessionManager {
    pub fn new(limits: SessionManagerLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sub_index: RwLock::new(SubIndex::default()),
            next_session_id: AtomicU64::new(1),
            limits,
        }
    }

    pub async fn create_session(
        &self,
        db_session_id: String,
        remote_addr: String,
        transport: Transport,
        conn: Box<dyn ByteSink>,
        now_ms: i64,
    ) -> Arc<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, db_session_id, remote_addr, transport, conn));
        session.state.write().await.last_activity = now_ms;
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    pub async fn get_session(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn get_all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn count_online_users(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Closes every live session's byte stream without removing it from the
    /// index (§5 shutdown sequence: `CloseAll()` unblocks each reader task
    /// with an error; the reader's own cleanup path then calls
    /// `remove_session`, so this does not prune the index itself).
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.conn.close().await;
        }
    }

    /// Idempotent: a second call for an already-removed id is a no-op (§8
    /// property 2). Closes the byte stream best-effort and prunes every
    /// reverse-index entry the session appeared in.
    pub async fn remove_session(&self, id: u64) {
        let session = self.sessions.write().await.remove(&id);
        let Some(session) = session else {
            return;
        };

        session.conn.close().await;

        let (channels, threads) = {
            let state = session.state.read().await;
            (
                state.subscribed_channels.clone(),
                state.subscribed_threads.clone(),
            )
        };

        let mut index = self.sub_index.write().await;
        for sub in channels {
            if let Some(set) = index.channel_subscribers.get_mut(&sub) {
                set.remove(&id);
                if set.is_empty() {
                    index.channel_subscribers.remove(&sub);
                }
            }
        }
        for thread_id in threads {
            if let Some(set) = index.thread_subscribers.get_mut(&thread_id) {
                set.remove(&id);
                if set.is_empty() {
                    index.thread_subscribers.remove(&thread_id);
                }
            }
        }
    }

    pub async fn subscribe_to_channel(
        &self,
        session: &Arc<Session>,
        sub: ChannelSub,
    ) -> Result<(), CoreError> {
        {
            let mut state = session.state.write().await;
            if !state.subscribed_channels.contains(&sub)
                && state.subscribed_channels.len() >= self.limits.max_channel_subs
            {
                return Err(CoreError::SubscriptionLimit);
            }
            state.subscribed_channels.insert(sub);
        }
        self.sub_index
            .write()
            .await
            .channel_subscribers
            .entry(sub)
            .or_default()
            .insert(session.id);
        Ok(())
    }

    pub async fn unsubscribe_from_channel(&self, session: &Arc<Session>, sub: ChannelSub) {
        {
            let mut state = session.state.write().await;
            state.subscribed_channels.remove(&sub);
        }
        let mut index = self.sub_index.write().await;
        if let Some(set) = index.channel_subscribers.get_mut(&sub) {
            set.remove(&session.id);
            if set.is_empty() {
                index.channel_subscribers.remove(&sub);
            }
        }
    }

    pub async fn subscribe_to_thread(
        &self,
        session: &Arc<Session>,
        thread_id: u64,
    ) -> Result<(), CoreError> {
        {
            let mut state = session.state.write().await;
            if !state.subscribed_threads.contains(&thread_id)
                && state.subscribed_threads.len() >= self.limits.max_thread_subs
            {
                return Err(CoreError::SubscriptionLimit);
            }
            state.subscribed_threads.insert(thread_id);
        }
        self.sub_index
            .write()
            .await
            .thread_subscribers
            .entry(thread_id)
            .or_default()
            .insert(session.id);
        Ok(())
    }

    pub async fn unsubscribe_from_thread(&self, session: &Arc<Session>, thread_id: u64) {
        {
            let mut state = session.state.write().await;
            state.subscribed_threads.remove(&thread_id);
        }
        let mut index = self.sub_index.write().await;
        if let Some(set) = index.thread_subscribers.get_mut(&thread_id) {
            set.remove(&session.id);
            if set.is_empty() {
                index.thread_subscribers.remove(&thread_id);
            }
        }
    }

    /// Tears down every subscription to `channel_id` (whole-channel and any
    /// subchannel scope) across every session, in both directions at once.
    /// Used when a channel is deleted: mutating a session's own
    /// `subscribed_channels` without also pruning `sub_index` would violate
    /// the forward/reverse invariant (§8 property 1), so this is the only
    /// correct way to bulk-drop subscriptions for a channel.
    pub async fn remove_channel_subscriptions(&self, channel_id: u64) {
        let mut index = self.sub_index.write().await;
        let subs: Vec<ChannelSub> = index
            .channel_subscribers
            .keys()
            .filter(|sub| sub.channel_id == channel_id)
            .copied()
            .collect();
        let mut affected: HashSet<u64> = HashSet::new();
        for sub in &subs {
            if let Some(ids) = index.channel_subscribers.remove(sub) {
                affected.extend(ids);
            }
        }
        drop(index);

        let sessions = self.sessions.read().await;
        for id in affected {
            if let Some(session) = sessions.get(&id) {
                session
                    .state
                    .write()
                    .await
                    .subscribed_channels
                    .retain(|sub| sub.channel_id != channel_id);
            }
        }
    }

    /// Snapshot slice: callers iterate without holding the index lock (§4.3).
    pub async fn get_channel_subscribers(&self, sub: ChannelSub) -> Vec<Arc<Session>> {
        let ids: Vec<u64> = self
            .sub_index
            .read()
            .await
            .channel_subscribers
            .get(&sub)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        self.resolve(ids).await
    }

    pub async fn get_thread_subscribers(&self, thread_id: u64) -> Vec<Arc<Session>> {
        let ids: Vec<u64> = self
            .sub_index
            .read()
            .await
            .thread_subscribers
            .get(&thread_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        self.resolve(ids).await
    }

    async fn resolve(&self, ids: Vec<u64>) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        ids.into_iter().filter_map(|id| sessions.get(&id).cloned()).collect()
    }

    /// Updates in-memory `last_activity` unconditionally and returns whether
    /// the caller should also persist it, rate-limited to at most once per
    /// half the session timeout (§4.3).
    pub async fn update_session_activity(
        &self,
        session: &Arc<Session>,
        now_ms: i64,
        session_timeout_ms: i64,
    ) -> bool {
        let mut state = session.state.write().await;
        state.last_activity = now_ms;
        if now_ms - state.last_persisted_activity >= session_timeout_ms / 2 {
            state.last_persisted_activity = now_ms;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelSub;
    use async_trait::async_trait;
    use chathub_protocol::Frame;

    struct NullSink;

    #[async_trait]
    impl ByteSink for NullSink {
        async fn write_frame(&self, _frame: &Frame) -> std::io::Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    async fn new_session(mgr: &SessionManager) -> Arc<Session> {
        mgr.create_session(
            "db-1".to_owned(),
            "127.0.0.1:1".to_owned(),
            Transport::Tcp,
            Box::new(NullSink),
            0,
        )
        .await
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_then_query_finds_nothing() {
        let mgr = SessionManager::new(SessionManagerLimits::default());
        let session = new_session(&mgr).await;
        let sub = ChannelSub::whole_channel(1);

        mgr.subscribe_to_channel(&session, sub).await.unwrap();
        assert_eq!(mgr.get_channel_subscribers(sub).await.len(), 1);

        mgr.unsubscribe_from_channel(&session, sub).await;
        assert!(mgr.get_channel_subscribers(sub).await.is_empty());
    }

    #[tokio::test]
    async fn remove_session_is_idempotent() {
        let mgr = SessionManager::new(SessionManagerLimits::default());
        let session = new_session(&mgr).await;
        mgr.subscribe_to_channel(&session, ChannelSub::whole_channel(1))
            .await
            .unwrap();

        mgr.remove_session(session.id).await;
        assert_eq!(mgr.count_online_users().await, 0);
        assert!(mgr
            .get_channel_subscribers(ChannelSub::whole_channel(1))
            .await
            .is_empty());

        // Second call must be a harmless no-op.
        mgr.remove_session(session.id).await;
        assert_eq!(mgr.count_online_users().await, 0);
    }

    #[tokio::test]
    async fn subscription_limit_is_enforced_at_the_boundary() {
        let mgr = SessionManager::new(SessionManagerLimits {
            max_thread_subs: 100,
            max_channel_subs: 2,
        });
        let session = new_session(&mgr).await;
        mgr.subscribe_to_channel(&session, ChannelSub::whole_channel(1))
            .await
            .unwrap();
        mgr.subscribe_to_channel(&session, ChannelSub::whole_channel(2))
            .await
            .unwrap();
        let err = mgr
            .subscribe_to_channel(&session, ChannelSub::whole_channel(3))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SubscriptionLimit));
    }

    #[tokio::test]
    async fn reverse_index_invariant_holds_for_threads_too() {
        let mgr = SessionManager::new(SessionManagerLimits::default());
        let session = new_session(&mgr).await;
        mgr.subscribe_to_thread(&session, 42).await.unwrap();
        assert_eq!(mgr.get_thread_subscribers(42).await.len(), 1);
        mgr.unsubscribe_from_thread(&session, 42).await;
        assert!(mgr.get_thread_subscribers(42).await.is_empty());
    }

    #[tokio::test]
    async fn close_all_closes_every_live_session_without_removing_it() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSink(Arc<AtomicUsize>);

        #[async_trait]
        impl ByteSink for CountingSink {
            async fn write_frame(&self, _frame: &Frame) -> std::io::Result<()> {
                Ok(())
            }
            async fn close(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mgr = SessionManager::new(SessionManagerLimits::default());
        let closes = Arc::new(AtomicUsize::new(0));
        let session = mgr
            .create_session(
                "db-1".to_owned(),
                "127.0.0.1:1".to_owned(),
                Transport::Tcp,
                Box::new(CountingSink(closes.clone())),
                0,
            )
            .await;

        mgr.close_all().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.count_online_users().await, 1);
        assert!(mgr.get_session(session.id).await.is_some());
    }

    #[tokio::test]
    async fn remove_channel_subscriptions_prunes_both_directions() {
        let mgr = SessionManager::new(SessionManagerLimits::default());
        let session = new_session(&mgr).await;
        let whole = ChannelSub::whole_channel(7);
        let sub = ChannelSub {
            channel_id: 7,
            subchannel_id: Some(1),
        };
        mgr.subscribe_to_channel(&session, whole).await.unwrap();
        mgr.subscribe_to_channel(&session, sub).await.unwrap();

        mgr.remove_channel_subscriptions(7).await;

        assert!(mgr.get_channel_subscribers(whole).await.is_empty());
        assert!(mgr.get_channel_subscribers(sub).await.is_empty());
        assert!(session
            .state
            .read()
            .await
            .subscribed_channels
            .is_empty());
    }
}
