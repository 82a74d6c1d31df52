//! Connection pool and schema migrations (§6 "Persisted state layout").
//!
//! Migrations are plain numbered SQL files under `migrations/`, embedded at
//! compile time and applied in version order, each inside its own
//! transaction that also inserts the migration's row into
//! `schema_migrations` -- the exact table spec.md names, not `sqlx::migrate!`'s
//! own bookkeeping table, since a durable-store consumer may query
//! `schema_migrations` directly to learn the applied version.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "init",
    sql: include_str!("../migrations/0001_init.sql"),
}];

pub async fn create_pool(database_url: &str) -> PgPool {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .expect("failed to connect to Postgres")
}

/// Applies every migration in `MIGRATIONS` whose version is not already
/// present in `schema_migrations`, in ascending version order, each in its
/// own transaction (§6).
pub async fn run_migrations(pool: &PgPool) {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY, \
            name TEXT NOT NULL, \
            applied_at BIGINT NOT NULL\
        )",
    )
    .execute(pool)
    .await
    .expect("failed to create schema_migrations");

    let mut ordered: Vec<&Migration> = MIGRATIONS.iter().collect();
    ordered.sort_by_key(|m| m.version);

    for migration in ordered {
        let already_applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await
                .expect("failed to query schema_migrations");
        if already_applied.is_some() {
            continue;
        }

        tracing::info!(version = migration.version, name = migration.name, "applying migration");
        let mut tx = pool.begin().await.expect("failed to start migration transaction");
        // `raw_sql` runs the file over the simple query protocol, so a
        // migration file with several `CREATE TABLE` statements executes as
        // one batch instead of needing one `execute()` per statement.
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .unwrap_or_else(|e| panic!("migration {} ({}) failed: {e}", migration.version, migration.name));
        sqlx::query(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES ($1, $2, $3)",
        )
        .bind(migration.version)
        .bind(migration.name)
        .bind(crate::state::now_ms())
        .execute(&mut *tx)
        .await
        .expect("failed to record applied migration");
        tx.commit().await.expect("failed to commit migration transaction");
    }
}
