//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use pokesync::data::{
    InstanceRef, MemoryStore, PersistenceHandle, PersistenceWorker, PokemonInstance, TradeRow,
    TradeStatus, Variant, VariantCatalog,
};
use pokesync::service::{CollectionService, RegistrationGroups, SessionContext, Snapshot};
use pokesync::{AppState, config};
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "ash";

/// Catalog entries used across scenarios
pub fn variants() -> Vec<Variant> {
    [
        ("0025-default", 25, false, false),
        ("0025-shiny", 25, true, false),
        ("0025-shadow", 25, false, true),
        ("0006-default", 6, false, false),
        ("0006-mega_x", 6, false, false),
        ("0201-a", 201, false, false),
        ("0201-b", 201, false, false),
    ]
    .into_iter()
    .map(|(variant_id, pokemon_id, shiny, shadow)| Variant {
        variant_id: variant_id.to_string(),
        pokemon_id,
        name: String::new(),
        variant_type: variant_id
            .split_once('-')
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default(),
        shiny,
        shadow,
        costume_id: None,
        mega_form: variant_id.ends_with("_x").then(|| "X".to_string()),
    })
    .collect()
}

pub fn variant_ref(variant_id: &str) -> InstanceRef {
    InstanceRef::Variant(variant_id.to_string())
}

pub fn trade(id: &str, proposer: &str, accepter: &str, give: &str, take: &str) -> TradeRow {
    TradeRow {
        trade_id: id.to_string(),
        username_proposed: proposer.to_string(),
        username_accepting: accepter.to_string(),
        pokemon_instance_id_user_proposed: give.to_string(),
        pokemon_instance_id_user_accepting: take.to_string(),
        trade_status: TradeStatus::Proposed,
        ..Default::default()
    }
}

pub fn caught(id: &str, variant_id: &str, last_update: i64) -> PokemonInstance {
    PokemonInstance {
        instance_id: id.to_string(),
        variant_id: variant_id.to_string(),
        is_caught: true,
        registered: true,
        last_update: pokesync::data::Timestamp(last_update),
        ..Default::default()
    }
}

/// Collection service wired to an in-memory store
pub struct TestCollection {
    pub service: CollectionService,
    pub store: Arc<MemoryStore>,
    worker: JoinHandle<()>,
}

impl TestCollection {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let (handle, receiver) = PersistenceHandle::channel();
        let worker = PersistenceWorker::spawn(store.clone(), receiver);
        let service = CollectionService::new(
            SessionContext::new(USERNAME),
            Arc::new(VariantCatalog::new(variants())),
            RegistrationGroups::default(),
            handle,
        );
        Self {
            service,
            store,
            worker,
        }
    }

    /// Drop the service and wait until every queued write reached the store
    pub async fn flush(self) -> Arc<MemoryStore> {
        drop(self.service);
        self.worker.await.unwrap();
        self.store
    }
}

/// Full application state over a temporary SQLite file
pub struct TestApp {
    pub state: AppState,
    pub snapshot_path: PathBuf,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let catalog_path = temp_dir.path().join("variants.json");
        let snapshot_path = temp_dir.path().join("snapshot.json");
        tokio::fs::write(&catalog_path, serde_json::to_vec(&variants()).unwrap())
            .await
            .unwrap();

        let config = config::AppConfig {
            session: config::SessionConfig {
                username: USERNAME.to_string(),
            },
            database: config::DatabaseConfig {
                path: temp_dir.path().join("test.db"),
            },
            catalog: config::CatalogConfig { path: catalog_path },
            sync: config::SyncConfig {
                snapshot_path: Some(snapshot_path.clone()),
                refresh_interval_seconds: 1,
                staleness_seconds: 3600,
            },
            registration: config::RegistrationConfig::default(),
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let state = AppState::new(config).await.unwrap();
        Self {
            state,
            snapshot_path,
            _temp_dir: temp_dir,
        }
    }

    pub async fn write_snapshot(&self, snapshot: &Snapshot) {
        tokio::fs::write(&self.snapshot_path, serde_json::to_vec(snapshot).unwrap())
            .await
            .unwrap();
    }
}
