use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hub::config::Config;
use hub::durable_pg::{self, PgStore};
use hub::state::{now_ms, AppState};
use hub::{db, directory_client, transport};

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "chathub.toml".to_owned());
    let config = Config::load(Path::new(&config_path)).expect("invalid configuration");

    info!("connecting to database...");
    let pool = db::create_pool(&config.server.database_path).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let state = AppState::new(config, pool.clone(), now_ms());

    let durable_store: Arc<dyn chathub_core::durable::DurableStore> = Arc::new(PgStore::new(pool.clone()));
    let snapshot_task = tokio::spawn(chathub_core::durable::run_snapshot_loop(
        state.memdb.clone(),
        durable_store,
        Duration::from_secs(10),
        state.shutdown_rx.clone(),
    ));

    let idle_cleanup_task = tokio::spawn(run_idle_cleanup(state.clone(), pool.clone()));
    let retention_task = tokio::spawn(run_retention_cleanup(state.clone(), pool.clone()));
    let directory_maintenance_task = tokio::spawn(run_directory_maintenance(state.clone()));

    directory_client::spawn_all(state.clone());

    let mut listener_tasks = Vec::new();

    let tcp_addr = format!("0.0.0.0:{}", state.config.server.tcp_port);
    let tcp_listener = tokio::net::TcpListener::bind(&tcp_addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind tcp listener on {tcp_addr}: {err}"));
    info!(addr = %tcp_addr, "tcp listener bound");
    listener_tasks.push(tokio::spawn(transport::tcp::serve(state.clone(), tcp_listener)));

    if state.config.server.ssh_port != 0 {
        let ssh_addr: SocketAddr = format!("0.0.0.0:{}", state.config.server.ssh_port)
            .parse()
            .expect("invalid ssh bind address");
        let host_key = load_or_generate_host_key(state.config.server.ssh_host_key.as_deref());
        info!(addr = %ssh_addr, "ssh listener starting");
        listener_tasks.push(tokio::spawn(transport::ssh::serve(state.clone(), ssh_addr, host_key)));
    }

    let mut ws_task = None;
    if state.config.server.ws_port != 0 {
        let ws_addr: SocketAddr = format!("0.0.0.0:{}", state.config.server.ws_port)
            .parse()
            .expect("invalid websocket bind address");
        let router = hub::build_ws_router(state.clone());
        let ws_listener = tokio::net::TcpListener::bind(ws_addr)
            .await
            .unwrap_or_else(|err| panic!("failed to bind websocket listener on {ws_addr}: {err}"));
        info!(addr = %ws_addr, "websocket listener bound");
        let shutdown_rx = state.shutdown_rx.clone();
        ws_task = Some(tokio::spawn(async move {
            axum::serve(
                ws_listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
            .await
            .expect("websocket server error");
        }));
    }

    shutdown_signal().await;
    info!("shutdown requested, draining connections");
    let _ = state.shutdown_tx.send(true);

    for task in listener_tasks {
        let _ = task.await;
    }
    if let Some(task) = ws_task {
        let _ = task.await;
    }

    // §5 shutdown sequence: listeners are closed (accept loops above have
    // already returned); now close every live session's byte stream so each
    // reader task unblocks with an error and runs its own cleanup path.
    state.sessions.close_all().await;

    let _ = idle_cleanup_task.await;
    let _ = retention_task.await;
    let _ = directory_maintenance_task.await;
    let _ = snapshot_task.await;

    info!("hub shut down gracefully");
}

async fn wait_for_shutdown(mut rx: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sweeps for sessions whose last activity is older than
/// `limits.session_timeout_seconds`, removing them the same way an explicit
/// `DISCONNECT` would (§5 "Idle cleanup", §8 scenario S6).
async fn run_idle_cleanup(state: Arc<AppState>, pool: sqlx::PgPool) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        let removed = state.sweep_idle_sessions().await;
        if removed > 0 {
            info!(removed, "idle cleanup swept stale sessions");
        }

        let timeout_ms = (state.config.limits.session_timeout_seconds as i64) * 1000;
        if let Err(err) = durable_pg::delete_sessions_older_than(&pool, now_ms() - timeout_ms).await {
            warn!(error = %err, "failed to delete stale session rows");
        }
    }
}

/// Prunes directory state on a fixed 5-minute tick (§4.6, §3 DiscoveredServer
/// "pruned on absence"): discovered servers that have gone quiet for
/// [`chathub_core::directory::STALE_SERVER_SILENCE_SECS`], and verify-back
/// challenges nobody ever answered.
async fn run_directory_maintenance(state: Arc<AppState>) {
    use chathub_core::directory::{PENDING_CHALLENGE_TIMEOUT_MS, STALE_SERVER_SILENCE_SECS};

    let mut ticker = tokio::time::interval(Duration::from_secs(300));
    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        let now = now_ms();
        state.memdb.prune_stale_servers(now, STALE_SERVER_SILENCE_SECS).await;
        state.pending_challenges.prune_expired(now, PENDING_CHALLENGE_TIMEOUT_MS).await;
    }
}

/// Deletes messages whose per-channel retention window has elapsed, on
/// `retention.cleanup_interval_minutes` (§4.2, §6).
async fn run_retention_cleanup(state: Arc<AppState>, pool: sqlx::PgPool) {
    let interval = Duration::from_secs(state.config.retention.cleanup_interval_minutes as u64 * 60);
    let mut ticker = tokio::time::interval(interval);
    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        match durable_pg::delete_expired_messages(&pool, now_ms()).await {
            Ok(deleted) if deleted > 0 => info!(deleted, "retention cleanup purged expired messages"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "retention cleanup failed"),
        }
    }
}

fn load_or_generate_host_key(path: Option<&str>) -> russh_keys::key::KeyPair {
    if let Some(path) = path {
        if let Ok(bytes) = std::fs::read(path) {
            if let Ok(key) = russh_keys::decode_secret_key(&String::from_utf8_lossy(&bytes), None) {
                return key;
            }
            warn!(%path, "failed to parse ssh host key, generating an ephemeral one");
        }
    }
    russh_keys::key::KeyPair::generate_ed25519().expect("failed to generate ssh host key")
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
