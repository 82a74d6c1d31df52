//! Postgres-backed [`DurableStore`] (§4.2, §6). One upsert statement per
//! dirty row, run inside a single transaction per snapshot so a partial
//! failure never leaves the durable store ahead of MemDB on some tables
//! and behind on others. Mirrors the plain `sqlx::query` + `Row::get`
//! style the teacher's `repo/*.rs` modules use rather than the
//! compile-time `query!` macros, since this workspace has no `DATABASE_URL`
//! available at build time.

use sqlx::PgPool;

use chathub_core::durable::DurableStore;
use chathub_core::memdb::DirtySnapshot;
use chathub_core::model::{AdminAuditEntry, Ban, BanKind, Channel, ChannelType, Message, User};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn channel_type_code(ty: ChannelType) -> i16 {
    match ty {
        ChannelType::Chat => 0,
        ChannelType::Forum => 1,
    }
}

fn ban_kind_code(kind: BanKind) -> i16 {
    match kind {
        BanKind::User => 0,
        BanKind::Ip => 1,
    }
}

async fn upsert_channel(tx: &mut sqlx::PgConnection, c: &Channel) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO channels
             (id, name, display_name, description, channel_type, retention_hours,
              created_by, created_at, is_private)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           ON CONFLICT (id) DO UPDATE SET
             name = EXCLUDED.name,
             display_name = EXCLUDED.display_name,
             description = EXCLUDED.description,
             channel_type = EXCLUDED.channel_type,
             retention_hours = EXCLUDED.retention_hours,
             is_private = EXCLUDED.is_private"#,
    )
    .bind(c.id as i64)
    .bind(&c.name)
    .bind(&c.display_name)
    .bind(&c.description)
    .bind(channel_type_code(c.channel_type))
    .bind(c.retention_hours as i32)
    .bind(c.created_by.map(|v| v as i64))
    .bind(c.created_at)
    .bind(c.is_private)
    .execute(tx)
    .await?;
    Ok(())
}

async fn upsert_message(tx: &mut sqlx::PgConnection, m: &Message) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO messages
             (id, channel_id, subchannel_id, parent_id, thread_root_id, author_user_id,
              author_nickname, content, created_at, edited_at, deleted_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           ON CONFLICT (id) DO UPDATE SET
             content = EXCLUDED.content,
             edited_at = EXCLUDED.edited_at,
             deleted_at = EXCLUDED.deleted_at"#,
    )
    .bind(m.id as i64)
    .bind(m.channel_id as i64)
    .bind(m.subchannel_id.map(|v| v as i64))
    .bind(m.parent_id.map(|v| v as i64))
    .bind(m.thread_root_id.map(|v| v as i64))
    .bind(m.author_user_id.map(|v| v as i64))
    .bind(&m.author_nickname)
    .bind(&m.content)
    .bind(m.created_at)
    .bind(m.edited_at)
    .bind(m.deleted_at)
    .execute(tx)
    .await?;
    Ok(())
}

async fn upsert_user(tx: &mut sqlx::PgConnection, u: &User) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO users (id, nickname, password_hash, user_flags, created_at, last_seen)
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT (id) DO UPDATE SET
             nickname = EXCLUDED.nickname,
             password_hash = EXCLUDED.password_hash,
             user_flags = EXCLUDED.user_flags,
             last_seen = EXCLUDED.last_seen"#,
    )
    .bind(u.id as i64)
    .bind(&u.nickname)
    .bind(&u.password_hash)
    .bind(u.user_flags as i32)
    .bind(u.created_at)
    .bind(u.last_seen)
    .execute(tx)
    .await?;
    Ok(())
}

async fn upsert_ban(tx: &mut sqlx::PgConnection, b: &Ban) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO bans
             (id, kind, user_id, nickname, ip_cidr, reason, shadowban, banned_at,
              banned_until, banned_by)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           ON CONFLICT (id) DO UPDATE SET
             reason = EXCLUDED.reason,
             shadowban = EXCLUDED.shadowban,
             banned_until = EXCLUDED.banned_until"#,
    )
    .bind(b.id as i64)
    .bind(ban_kind_code(b.kind))
    .bind(b.user_id.map(|v| v as i64))
    .bind(&b.nickname)
    .bind(&b.ip_cidr)
    .bind(&b.reason)
    .bind(b.shadowban)
    .bind(b.banned_at)
    .bind(b.banned_until)
    .bind(b.banned_by.map(|v| v as i64))
    .execute(tx)
    .await?;
    Ok(())
}

async fn upsert_admin_audit_entry(
    tx: &mut sqlx::PgConnection,
    e: &AdminAuditEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO admin_audit_log (id, admin_user_id, action, target, detail, created_at)
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT (id) DO NOTHING"#,
    )
    .bind(e.id as i64)
    .bind(e.admin_user_id.map(|v| v as i64))
    .bind(&e.action)
    .bind(&e.target)
    .bind(&e.detail)
    .bind(e.created_at)
    .execute(tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl DurableStore for PgStore {
    async fn persist_snapshot(&self, snapshot: &DirtySnapshot) -> Result<(), String> {
        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;
        for c in &snapshot.channels {
            upsert_channel(&mut tx, c).await.map_err(|e| e.to_string())?;
        }
        for m in &snapshot.messages {
            upsert_message(&mut tx, m).await.map_err(|e| e.to_string())?;
        }
        for u in &snapshot.users {
            upsert_user(&mut tx, u).await.map_err(|e| e.to_string())?;
        }
        for b in &snapshot.bans {
            upsert_ban(&mut tx, b).await.map_err(|e| e.to_string())?;
        }
        for e in &snapshot.audit_log {
            upsert_admin_audit_entry(&mut tx, e).await.map_err(|err| err.to_string())?;
        }
        tx.commit().await.map_err(|e| e.to_string())
    }
}

/// Persists a session's `last_activity`, called from the rate-limited path
/// in `SessionManager::update_session_activity` (§4.3 `UpdateSessionActivity`:
/// "only persists if `now_ms - last_persisted ≥ session_timeout/2`").
pub async fn touch_session_activity(pool: &PgPool, db_session_id: &str, now_ms: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET last_activity = $1 WHERE db_session_id = $2")
        .bind(now_ms)
        .bind(db_session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Loads every `(db_session_id, last_activity)` pair older than `cutoff_ms`,
/// used by the idle-session cleanup sweep to also drop stale durable rows
/// (§5 "Idle cleanup").
pub async fn delete_sessions_older_than(pool: &PgPool, cutoff_ms: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE last_activity < $1")
        .bind(cutoff_ms)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes messages whose channel's retention window has elapsed (§4.2,
/// §6 retention config), run by the retention cleanup ticker.
pub async fn delete_expired_messages(pool: &PgPool, now_ms: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"DELETE FROM messages m
           USING channels c
           WHERE m.channel_id = c.id
             AND m.created_at < $1 - (c.retention_hours::bigint * 3600000)"#,
    )
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

