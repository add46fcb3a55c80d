//! Installation synchronization for the mobile messaging SDK
//!
//! This crate keeps a device's installation record on the push registry in
//! step with local state:
//! - Detects which installation fields still need reporting
//! - Creates the installation once a push token exists, patches it afterwards
//! - Updates other installations of the same user (primary device handover)
//! - Persists reported markers with commit and rollback around every exchange

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{RegistryError, SyncError};
pub use models::*;
pub use observability::{init_tracing, SyncMetrics};
pub use store::{JsonFileStore, LocalStateStore, MemoryStore};
pub use sync::{InstallationSynchronizer, InstallationSynchronizerBuilder, Listener, TaskHandle};
