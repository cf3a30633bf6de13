use std::sync::{Arc, Mutex};

use fleet_gateway::prober::{IcmpPinger, Pinger, ReachabilityProber};
use fleet_gateway::repo::devices;
use fleet_gateway::{build_router, db, notify, AppState};
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = fleet_gateway::config::load_config().expect("failed to load gateway config");
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| format!("0.0.0.0:{}", config.browser_port));

    info!("connecting to database...");
    let pool = db::create_pool(&database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let state = AppState::new(pool.clone(), config);
    state.logger.log("gateway starting up");

    seed_registry(&state).await;
    spawn_notification_listener(&state);
    spawn_reachability_prober(&state);

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("gateway shut down gracefully");
}

/// Start one Homebase Link for every non-hidden device already on file
/// (spec.md §4.A "A drives C instantiation... lifecycle-bound to registry
/// membership").
async fn seed_registry(state: &AppState) {
    match devices::load_all(&state.pool).await {
        Ok(rows) => {
            for row in rows.into_iter().filter(|r| !r.hidden) {
                if let Err(e) = state.registry.ensure(&row.address).await {
                    warn!(address = %row.address, error = %e, "skipping device at startup");
                    state.logger.log(format!("skipping device {}: {e}", row.address));
                }
            }
        }
        Err(e) => error!(error = %e, "failed to load devices at startup"),
    }
}

fn spawn_notification_listener(state: &AppState) {
    let pool = state.pool.clone();
    let cache = state.cache.clone();
    let store = state.notify_store.clone();
    let broadcaster = state.broadcaster.clone();
    tokio::spawn(notify::run(pool, cache, store, broadcaster));
}

/// The scheduler's address list must be a plain sync closure (it runs on
/// every tick with no `.await`), but the store read that backs it is async.
/// A small mirror task keeps a `std::sync::Mutex` snapshot in sync so the
/// prober can read it without blocking.
///
/// Sourced from `devices::load_all` rather than `registry.known_addresses()`
/// deliberately: `hidden` is a UI-display flag, not a reachability-probing
/// eligibility flag, and a hidden device never gets a Homebase Link — the
/// registry would never know its address otherwise.
fn spawn_reachability_prober(state: &AppState) {
    let pinger: Arc<dyn Pinger> = match IcmpPinger::new() {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "failed to initialize ICMP client, reachability probing disabled");
            return;
        }
    };

    let prober = Arc::new(ReachabilityProber::new(state.pool.clone(), pinger, state.config.prober.clone()));

    let addresses = Arc::new(Mutex::new(Vec::new()));
    let mirror_addresses = addresses.clone();
    let pool = state.pool.clone();
    let refresh_interval_ms = state.config.prober.probe_interval_ms.min(10_000);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(refresh_interval_ms));
        loop {
            interval.tick().await;
            match devices::load_all(&pool).await {
                Ok(rows) => {
                    let current = rows.into_iter().map(|r| r.address).collect();
                    *mirror_addresses.lock().expect("address mirror mutex poisoned") = current;
                }
                Err(e) => error!(error = %e, "failed to refresh device list for reachability prober"),
            }
        }
    });

    tokio::spawn(prober.run(move || addresses.lock().expect("address mirror mutex poisoned").clone()));
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
