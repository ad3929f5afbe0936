//! Gun Arena Server - authoritative gun-game arenas
//!
//! Starts every configured arena against the in-process headless host and
//! runs until interrupted. Outbound traffic is logged at debug level.

use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gun_arena_server::app::AppState;
use gun_arena_server::config::Config;
use gun_arena_server::host::{HeadlessHost, Outbound};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Gun Arena Server");
    info!(weapon_set = ?config.weapon_set, arenas = config.arenas.len(), "Configuration loaded");

    // A malformed weapon catalog is fatal
    let state = AppState::new(config)?;
    for weapon in state.catalog.weapons() {
        debug!(
            weapon = %weapon.name,
            required_kills = weapon.required_kills,
            victory = weapon.is_victory_weapon,
            "Catalog entry"
        );
    }

    let handles = state.start_arenas(|| {
        let host = HeadlessHost::new();
        tokio::spawn(log_outbound(host.subscribe()));
        host
    });

    for handle in &handles {
        info!(arena_id = handle.id, name = %handle.name, max_players = handle.max_players, "Arena ready");
        tokio::spawn(log_kills(handle.id, handle.subscribe_kills()));
    }

    shutdown_signal().await;

    state.match_registry.close_all();
    drop(handles);

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn log_outbound(mut rx: tokio::sync::broadcast::Receiver<Outbound>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(Outbound::LobbyTransfer { user_id }) => {
                info!(user_id = %user_id, "Player returned to lobby");
            }
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(payload = %json, "Outbound"),
                Err(e) => warn!(error = %e, "Outbound event not encodable"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Outbound log lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn log_kills(
    arena_id: u32,
    mut rx: tokio::sync::broadcast::Receiver<gun_arena_server::game::protocol::KillReport>,
) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(report) => info!(
                arena_id,
                attacker_id = %report.attacker_id,
                victim_id = %report.victim_id,
                weapon = %report.weapon,
                damage = report.damage,
                "Kill"
            ),
            Err(RecvError::Lagged(skipped)) => warn!(arena_id, skipped, "Kill log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
