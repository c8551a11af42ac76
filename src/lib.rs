//! PokeSync - instance ownership and trade synchronization engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Instance status engine + registration propagation        │
//! │  - Reconciliation (merge) engine                            │
//! │  - Trade lifecycle engine                                   │
//! │  - Tag/view derivation                                      │
//! │  - CollectionService facade, snapshot refresh               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Instance / trade models, variant catalog                 │
//! │  - Store contract: SQLite (sqlx) and in-memory              │
//! │  - Fire-and-forget persistence worker                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `service`: Engines and the per-session collection facade
//! - `data`: Models, catalog and durable store
//! - `config`: Configuration management
//! - `error`: Error types

pub mod config;
pub mod data;
pub mod error;
pub mod service;

use std::sync::Arc;

use tokio::sync::Mutex;

/// Application state shared by the binary's tasks
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// SQLite mirror
    pub db: Arc<data::Database>,

    /// Read-only variant catalog
    pub catalog: Arc<data::VariantCatalog>,

    /// The session's collection
    pub collection: Arc<Mutex<service::CollectionService>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Load the variant catalog
    /// 3. Spawn the persistence worker
    /// 4. Hydrate the collection from the database and report what the
    ///    mirror holds
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);

        // 2. Load the variant catalog
        let catalog = Arc::new(data::VariantCatalog::load(&config.catalog.path).await?);

        // 3. Spawn the persistence worker
        let (persistence, receiver) = data::PersistenceHandle::channel();
        let store: Arc<dyn data::CollectionStore> = db.clone();
        data::PersistenceWorker::spawn(store, receiver);

        // 4. Hydrate the collection
        let mut collection = service::CollectionService::new(
            service::SessionContext::new(config.session.username.clone()),
            catalog.clone(),
            config.registration.groups(),
            persistence,
        );
        collection.hydrate(db.as_ref()).await?;

        let stored_instances = db.count_instances().await?;
        let pending_trades = db
            .get_trades_by_status(data::TradeStatus::Pending)
            .await?
            .len();

        tracing::info!(
            username = %config.session.username,
            stored_instances,
            pending_trades,
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            catalog,
            collection: Arc::new(Mutex::new(collection)),
        })
    }

    /// Snapshot refresher for the configured source, if any
    pub fn refresher(&self) -> Option<service::SnapshotRefresher> {
        let path = self.config.sync.snapshot_path.as_ref()?;
        let source: Arc<dyn service::SnapshotSource> =
            Arc::new(service::FileSnapshotSource::new(path.clone()));
        Some(service::SnapshotRefresher::new(
            self.collection.clone(),
            source,
        ))
    }
}
