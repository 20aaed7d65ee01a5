use std::net::SocketAddr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use formrelay::config::Config;
use formrelay::db::Stores;
use formrelay::integrations::HookChain;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = Config::from_env().expect("Failed to load configuration");

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    tracing::info!("Starting formrelay");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations applied");

    let stores = Stores::postgres(pool, &config.encryption_key);
    let registry = formrelay::build_registry(&config);
    tracing::info!("{} integration providers registered", registry.list().len());

    let addr = SocketAddr::new(config.host, config.port);
    let worker_count = config.worker_count;
    let job_timeout = config.job_timeout;
    let state = formrelay::build_state(stores, config, registry, HookChain::new());

    // Queue workers run on their own runtime so slow providers never starve
    // the HTTP side.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = formrelay::worker::run_pool(
        state.dispatcher.clone(),
        shutdown_rx,
        worker_count,
        job_timeout,
    );

    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            loop {
                tick.tick().await;
                let removed = state.submission_limiter.sweep(Duration::from_secs(3600));
                tracing::debug!(removed, "Swept rate limit windows");
            }
        })
    };

    let app = formrelay::build_app_with(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    let _ = shutdown_tx.send(true);
    let _ = tokio::task::spawn_blocking(move || workers.join()).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
