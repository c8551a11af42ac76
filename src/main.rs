//! PokeSync binary entry point

use pokesync::{AppState, config, service};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from `[logging]`
/// 3. Initialize AppState (database, catalog, persistence worker)
/// 4. Run the snapshot refresh loop until Ctrl-C
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);

    tracing::info!("Starting PokeSync...");
    tracing::info!(
        username = %config.session.username,
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    // 3. Initialize application state
    let state = AppState::new(config).await?;

    // 4. Refresh loop
    match state.refresher() {
        Some(refresher) => {
            let task = spawn_refresh_task(state.clone(), refresher);
            tokio::signal::ctrl_c().await?;
            task.abort();
        }
        None => {
            tracing::warn!("sync.snapshot_path is not set; running without snapshot refresh");
            tokio::signal::ctrl_c().await?;
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level` when set.
fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pokesync={}", logging.level).into());

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Spawn background snapshot refresh task
///
/// Refreshes immediately, then every `sync.refresh_interval_seconds`.
fn spawn_refresh_task(
    state: AppState,
    refresher: service::SnapshotRefresher,
) -> tokio::task::JoinHandle<()> {
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.sync.refresh_interval());
        let staleness = state.config.sync.staleness();

        loop {
            interval.tick().await;

            tracing::info!("Running scheduled snapshot refresh...");
            match refresher.refresh().await {
                Ok(service::RefreshOutcome::Applied(outcome)) => {
                    let collection = state.collection.lock().await;
                    let views = collection.views();
                    tracing::info!(
                        changed = outcome.changed,
                        instances = outcome.instances,
                        favorites = views.favorites.len(),
                        trade_listed = views.trade_listed.len(),
                        most_wanted = views.most_wanted.len(),
                        "Snapshot refresh completed"
                    );
                }
                Ok(service::RefreshOutcome::Skipped) => {
                    tracing::debug!("Snapshot refresh skipped; previous refresh still running");
                }
                Err(error) => {
                    tracing::error!(%error, "Snapshot refresh failed");
                    let collection = state.collection.lock().await;
                    if collection.is_stale(chrono::Utc::now(), staleness) {
                        tracing::warn!(
                            last_refresh = ?collection.last_refresh(),
                            "Collection is stale"
                        );
                    }
                }
            }
        }
    });

    tracing::info!("Snapshot refresh task spawned");
    task
}
