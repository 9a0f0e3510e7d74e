//! Storage module for the activity database and configuration.

pub mod config;
pub mod database;
pub mod schema;
pub mod store;

pub use config::{load_config, save_config, AppConfig, ConfigError};
pub use database::{Database, DatabaseError};
pub use store::{ActivityStore, Checkpoint, MemoryStore};
