//! Local state storage
//!
//! This module provides the persisted key/value accessor used for
//! reported/unreported markers and cached installation values:
//! - `MemoryStore` for tests and ephemeral hosts
//! - `JsonFileStore` persisting to a JSON file with atomic writes

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::models::CustomAttributes;
use serde::{Deserialize, Serialize};

/// Stable key names used by the synchronizer
pub mod keys {
    pub const PUSH_REGISTRATION_ID: &str = "push_registration_id";
    pub const CLOUD_TOKEN_REPORTED: &str = "cloud_token_reported";
    pub const REPORTED_CLOUD_TOKEN: &str = "reported_cloud_token";
    pub const APPLICATION_USER_ID: &str = "application_user_id";
    pub const APPLICATION_USER_ID_REPORTED: &str = "application_user_id_reported";
    pub const REPORTED_PUSH_SERVICE_TYPE: &str = "reported_push_service_type";
    pub const PRIMARY_SETTING: &str = "primary_setting";
    pub const UNREPORTED_PRIMARY_SETTING: &str = "unreported_primary_setting";
    pub const PUSH_REGISTRATION_ENABLED: &str = "push_registration_enabled";
    pub const CUSTOM_ATTRIBUTES: &str = "custom_attributes";
    pub const UNREPORTED_CUSTOM_ATTRIBUTES: &str = "unreported_custom_attributes";
    pub const REPORTED_SYSTEM_DATA_HASH: &str = "reported_system_data_hash";
    pub const UNREPORTED_SYSTEM_DATA: &str = "unreported_system_data";
    pub const REPORT_SYSTEM_INFO: &str = "report_system_info";
    pub const LAST_ERROR_CODE: &str = "last_error_code";
    pub const LAST_ERROR_MESSAGE: &str = "last_error_message";
    pub const LAST_ERROR_AT: &str = "last_error_at";
}

/// A single persisted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    Bool(bool),
    Int(i64),
    String(String),
    Map(CustomAttributes),
}

/// Persisted key/value store.
///
/// Writes never fail from the caller's point of view: a persistent backend
/// logs storage failures and keeps serving the latest in-memory value.
pub trait LocalStateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoreValue>;

    fn set(&self, key: &str, value: StoreValue);

    fn remove(&self, key: &str);

    /// Apply several writes as one unit; persistent backends write them out once
    fn batch(&self, apply: &mut dyn FnMut()) {
        apply()
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(StoreValue::Bool(value)) => Some(value),
            _ => None,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(StoreValue::String(value)) => Some(value),
            _ => None,
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(StoreValue::Int(value)) => Some(value),
            _ => None,
        }
    }

    fn get_map(&self, key: &str) -> Option<CustomAttributes> {
        match self.get(key) {
            Some(StoreValue::Map(value)) => Some(value),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.set(key, StoreValue::Bool(value));
    }

    fn set_string(&self, key: &str, value: &str) {
        self.set(key, StoreValue::String(value.to_string()));
    }

    fn set_int(&self, key: &str, value: i64) {
        self.set(key, StoreValue::Int(value));
    }

    fn set_map(&self, key: &str, value: CustomAttributes) {
        self.set(key, StoreValue::Map(value));
    }
}
