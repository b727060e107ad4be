//! Account service binary entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use account_service::{
    router, AccountServiceConfig, AppState, DigestSealer, MemoryAccounts, PgAccounts,
    SharedAccounts,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before tracing so the log format can be honored
    let loaded = AccountServiceConfig::load();
    let log_format = loaded
        .as_ref()
        .map_or("pretty", |config| config.service.log_format.as_str())
        .to_string();

    // Initialize tracing
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "account_service=info,tower_http=info,sqlx=warn".into()),
    );
    if log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting account-service");

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", *e);
        AccountServiceConfig::default()
    });

    let sealer = DigestSealer::with_params(
        config.password.memory_cost,
        config.password.time_cost,
        config.password.parallelism,
        Some(config.password.hash_length),
    )?;

    let accounts: SharedAccounts = if config.database.is_memory() {
        tracing::warn!("Using in-memory account store; accounts are lost on restart");
        Arc::new(MemoryAccounts::new(sealer))
    } else {
        let store = PgAccounts::connect(&config.database, sealer).await?;
        if config.database.run_migrations {
            store.migrate().await?;
            tracing::info!("Migrations applied");
        }
        Arc::new(store)
    };

    let state = AppState::new(accounts, &config);

    let sweeper = config.session.cleanup_interval().map(|every| {
        tracing::info!(every_secs = every.as_secs(), "Session sweeper started");
        state.sessions.spawn_sweeper(every)
    });

    let app = router(state);

    // Build server address
    let addr: SocketAddr = format!("{}:{}", config.service.host, config.service.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on {addr}{}", config.service.base_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!("account-service shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
