//! Data layer module
//!
//! Handles the collection's data shapes and their durable mirror:
//! - Instance and trade models
//! - Read-only variant catalog
//! - Store contract (SQLite and in-memory implementations)
//! - Fire-and-forget persistence queue

mod catalog;
mod database;
mod models;
mod persist;
mod store;

pub use catalog::{
    Variant, VariantCatalog, descriptor, fusion_id, is_mega_descriptor, species_number,
    strip_instance_suffix,
};
pub use database::Database;
pub use models::*;
pub use persist::{PersistCommand, PersistenceHandle, PersistenceWorker};
pub use store::{CollectionStore, MemoryStore, PendingUpdate, UpdateKind};
