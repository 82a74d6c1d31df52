//! Encode-once, fan-out-many delivery via a bounded worker pool (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use chathub_protocol::Frame;

use crate::model::{ChannelSub, Session, ADMIN_FLAG};
use crate::session::SessionManager;

const MAX_WORKERS: usize = 40;
const SESSIONS_PER_WORKER: usize = 50;

/// Splits `sessions` into at most [`MAX_WORKERS`] chunks of roughly
/// [`SESSIONS_PER_WORKER`] each (§4.4 step 3).
fn chunk_sessions(sessions: Vec<Arc<Session>>) -> Vec<Vec<Arc<Session>>> {
    if sessions.is_empty() {
        return Vec::new();
    }
    let n = sessions.len();
    let workers = n.div_ceil(SESSIONS_PER_WORKER).min(MAX_WORKERS).max(1);
    let chunk_size = n.div_ceil(workers);
    sessions
        .chunks(chunk_size)
        .map(<[Arc<Session>]>::to_vec)
        .collect()
}

pub struct Broadcaster {
    sessions: Arc<SessionManager>,
}

impl Broadcaster {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Used by edits, deletes, and channel-level admin events. Recipients are
    /// the union of sessions with this channel joined and sessions
    /// subscribed to the whole-channel scope, deduplicated by session id.
    pub async fn broadcast_to_channel(&self, channel_id: u64, frame: Frame) {
        let mut recipients: HashMap<u64, Arc<Session>> = HashMap::new();

        for session in self.sessions.get_all_sessions().await {
            if session.state.read().await.joined_channel == Some(channel_id) {
                recipients.insert(session.id, session);
            }
        }
        for session in self
            .sessions
            .get_channel_subscribers(ChannelSub::whole_channel(channel_id))
            .await
        {
            recipients.insert(session.id, session);
        }

        self.fan_out(recipients.into_values().collect(), frame).await;
    }

    /// Used for server-wide presence (e.g. a nickname change, §9 "always
    /// broadcast" resolution). Every online session is a recipient.
    pub async fn broadcast_to_all(&self, frame: Frame) {
        self.fan_out(self.sessions.get_all_sessions().await, frame).await;
    }

    /// Used by POST. Top-level messages fan out to channel subscribers;
    /// replies fan out to the thread's subscribers. A shadowbanned author's
    /// post is filtered to `{author} ∪ {admins}` before fan-out (§3 Ban).
    pub async fn broadcast_new_message(
        &self,
        author_session: &Arc<Session>,
        channel_id: u64,
        subchannel_id: Option<u64>,
        thread_root_id: Option<u64>,
        shadowbanned: bool,
        frame: Frame,
    ) {
        let recipients = if let Some(thread_root_id) = thread_root_id {
            self.sessions.get_thread_subscribers(thread_root_id).await
        } else {
            self.sessions
                .get_channel_subscribers(ChannelSub {
                    channel_id,
                    subchannel_id,
                })
                .await
        };

        let recipients = if shadowbanned {
            let mut filtered = Vec::with_capacity(recipients.len());
            for session in recipients {
                let is_admin = session.state.read().await.user_flags & ADMIN_FLAG != 0;
                if session.id == author_session.id || is_admin {
                    filtered.push(session);
                }
            }
            filtered
        } else {
            recipients
        };

        self.fan_out(recipients, frame).await;
    }

    async fn fan_out(&self, recipients: Vec<Arc<Session>>, frame: Frame) {
        if recipients.is_empty() {
            return;
        }

        let mut workers = JoinSet::new();
        for chunk in chunk_sessions(recipients) {
            let frame = frame.clone();
            workers.spawn(async move {
                let mut dead = Vec::new();
                for session in chunk {
                    if session.conn.write_frame(&frame).await.is_err() {
                        dead.push(session.id);
                    }
                }
                dead
            });
        }

        let mut dead_ids = Vec::new();
        while let Some(result) = workers.join_next().await {
            if let Ok(mut ids) = result {
                dead_ids.append(&mut ids);
            }
        }
        for id in dead_ids {
            self.sessions.remove_session(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ByteSink, Transport};
    use crate::session::SessionManagerLimits;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn chunk_sessions_caps_worker_count_at_forty() {
        let sessions: Vec<Arc<Session>> = Vec::new();
        assert!(chunk_sessions(sessions).is_empty());
    }

    #[test]
    fn chunk_count_follows_the_ceil_n_over_50_formula() {
        // 120 sessions -> ceil(120/50) = 3 workers, chunk size ceil(120/3) = 40.
        let sizes: Vec<usize> = (0..120)
            .collect::<Vec<_>>()
            .chunks(40)
            .map(<[usize]>::len)
            .collect();
        assert_eq!(sizes, vec![40, 40, 40]);
    }

    struct RecordingSink {
        fail: bool,
        writes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ByteSink for RecordingSink {
        async fn write_frame(&self, _frame: &Frame) -> std::io::Result<()> {
            if self.fail {
                Err(std::io::Error::other("dead peer"))
            } else {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn fan_out_reaps_sessions_whose_write_fails() {
        let mgr = Arc::new(SessionManager::new(SessionManagerLimits::default()));
        let writes = Arc::new(AtomicUsize::new(0));

        let good = mgr
            .create_session(
                "db-good".to_owned(),
                "127.0.0.1:1".to_owned(),
                Transport::Tcp,
                Box::new(RecordingSink {
                    fail: false,
                    writes: writes.clone(),
                }),
                0,
            )
            .await;
        let dead = mgr
            .create_session(
                "db-dead".to_owned(),
                "127.0.0.1:2".to_owned(),
                Transport::Tcp,
                Box::new(RecordingSink {
                    fail: true,
                    writes: writes.clone(),
                }),
                0,
            )
            .await;

        let sub = ChannelSub::whole_channel(1);
        mgr.subscribe_to_channel(&good, sub).await.unwrap();
        mgr.subscribe_to_channel(&dead, sub).await.unwrap();

        let broadcaster = Broadcaster::new(mgr.clone());
        let frame = Frame::new(0x97, Bytes::from_static(b"hi"));
        broadcaster.broadcast_to_channel(1, frame).await;

        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.count_online_users().await, 1);
        assert!(mgr.get_session(dead.id).await.is_none());
        assert!(mgr.get_session(good.id).await.is_some());
    }
}
