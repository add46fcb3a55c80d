//! Persisted synchronization progress
//!
//! `SyncState` is a typed view over the [`LocalStateStore`]. Only the
//! synchronizer writes to it; the change detector only reads it (apart from
//! staging the pending system data).

use crate::error::SyncError;
use crate::models::{CustomAttributes, PushServiceType, SystemSnapshot};
use crate::store::{keys, LocalStateStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Plain snapshot of every persisted marker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStateView {
    pub push_registration_id: Option<String>,
    pub cloud_token_reported: bool,
    pub reported_cloud_token: Option<String>,
    pub application_user_id: Option<String>,
    pub application_user_id_reported: bool,
    pub reported_push_service_type: Option<PushServiceType>,
    pub primary_setting: Option<bool>,
    pub unreported_primary_setting: Option<bool>,
    pub push_registration_enabled: bool,
    pub custom_attributes: Option<CustomAttributes>,
    pub unreported_custom_attributes: Option<CustomAttributes>,
    pub reported_system_data_hash: Option<i64>,
    pub unreported_system_data: Option<String>,
    pub last_error_code: Option<String>,
}

/// Handle over the persisted synchronization state
#[derive(Clone)]
pub struct SyncState {
    store: Arc<dyn LocalStateStore>,
}

impl SyncState {
    pub fn new(store: Arc<dyn LocalStateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LocalStateStore> {
        &self.store
    }

    // === Identity ===

    pub fn push_registration_id(&self) -> Option<String> {
        self.store
            .get_string(keys::PUSH_REGISTRATION_ID)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn set_push_registration_id(&self, id: &str) {
        self.store.set_string(keys::PUSH_REGISTRATION_ID, id);
    }

    /// No identity has been assigned by the registry yet
    pub fn is_registration_unavailable(&self) -> bool {
        self.push_registration_id().is_none()
    }

    // === Push token ===

    pub fn cloud_token_reported(&self) -> bool {
        self.store.get_bool(keys::CLOUD_TOKEN_REPORTED).unwrap_or(false)
    }

    pub fn set_cloud_token_reported(&self, reported: bool) {
        self.store.set_bool(keys::CLOUD_TOKEN_REPORTED, reported);
    }

    pub fn reported_cloud_token(&self) -> Option<String> {
        self.store.get_string(keys::REPORTED_CLOUD_TOKEN)
    }

    /// Mark `token` as acknowledged by the registry
    pub fn mark_cloud_token_reported(&self, token: &str) {
        self.store.set_string(keys::REPORTED_CLOUD_TOKEN, token);
        self.set_cloud_token_reported(true);
    }

    // === Push service type ===

    pub fn reported_push_service_type(&self) -> Option<PushServiceType> {
        let raw = self.store.get_string(keys::REPORTED_PUSH_SERVICE_TYPE)?;
        match raw.parse() {
            Ok(ty) => Some(ty),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable reported push service type");
                None
            }
        }
    }

    pub fn set_reported_push_service_type(&self, ty: PushServiceType) {
        self.store.set_string(keys::REPORTED_PUSH_SERVICE_TYPE, ty.as_str());
    }

    // === Application user id ===

    pub fn application_user_id(&self) -> Option<String> {
        self.store.get_string(keys::APPLICATION_USER_ID)
    }

    /// Store a new application user id, to be reported on the next exchange
    pub fn set_application_user_id(&self, id: &str) {
        self.store.set_string(keys::APPLICATION_USER_ID, id);
        self.set_application_user_id_reported(false);
    }

    pub fn application_user_id_reported(&self) -> bool {
        self.store
            .get_bool(keys::APPLICATION_USER_ID_REPORTED)
            .unwrap_or(false)
    }

    pub fn set_application_user_id_reported(&self, reported: bool) {
        self.store.set_bool(keys::APPLICATION_USER_ID_REPORTED, reported);
    }

    // === Primary device ===

    pub fn primary_setting(&self) -> Option<bool> {
        self.store.get_bool(keys::PRIMARY_SETTING)
    }

    pub fn set_primary_setting(&self, primary: bool) {
        self.store.set_bool(keys::PRIMARY_SETTING, primary);
    }

    pub fn unreported_primary_setting(&self) -> Option<bool> {
        self.store.get_bool(keys::UNREPORTED_PRIMARY_SETTING)
    }

    pub fn set_unreported_primary_setting(&self, primary: bool) {
        self.store.set_bool(keys::UNREPORTED_PRIMARY_SETTING, primary);
    }

    pub fn clear_unreported_primary_setting(&self) {
        self.store.remove(keys::UNREPORTED_PRIMARY_SETTING);
    }

    // === Registration enabled ===

    pub fn push_registration_enabled(&self) -> bool {
        self.store
            .get_bool(keys::PUSH_REGISTRATION_ENABLED)
            .unwrap_or(true)
    }

    pub fn set_push_registration_enabled(&self, enabled: bool) {
        self.store.set_bool(keys::PUSH_REGISTRATION_ENABLED, enabled);
    }

    // === Custom attributes ===

    /// Attributes acknowledged by (or fetched from) the registry
    pub fn custom_attributes(&self) -> Option<CustomAttributes> {
        self.store.get_map(keys::CUSTOM_ATTRIBUTES)
    }

    pub fn set_custom_attributes(&self, attributes: CustomAttributes) {
        self.store.set_map(keys::CUSTOM_ATTRIBUTES, attributes);
    }

    pub fn unreported_custom_attributes(&self) -> Option<CustomAttributes> {
        self.store.get_map(keys::UNREPORTED_CUSTOM_ATTRIBUTES)
    }

    /// Merge `attributes` into the pending buffer and return the whole buffer
    pub fn stage_custom_attributes(&self, attributes: CustomAttributes) -> CustomAttributes {
        let mut pending = self.unreported_custom_attributes().unwrap_or_default();
        pending.extend(attributes);
        self.store
            .set_map(keys::UNREPORTED_CUSTOM_ATTRIBUTES, pending.clone());
        pending
    }

    /// Move the pending buffer into the reported set
    pub fn commit_custom_attributes(&self) {
        let Some(pending) = self.unreported_custom_attributes() else {
            return;
        };

        let mut reported = self.custom_attributes().unwrap_or_default();
        reported.extend(pending);
        self.set_custom_attributes(reported);
        self.store.remove(keys::UNREPORTED_CUSTOM_ATTRIBUTES);
    }

    // === System data ===

    pub fn reported_system_data_hash(&self) -> Option<i64> {
        self.store.get_int(keys::REPORTED_SYSTEM_DATA_HASH)
    }

    pub fn unreported_system_data(&self) -> Option<String> {
        self.store.get_string(keys::UNREPORTED_SYSTEM_DATA)
    }

    /// Remember a snapshot that differs from the last reported one
    pub fn stage_system_data(&self, data: &SystemSnapshot) {
        match serde_json::to_string(data) {
            Ok(json) => self.store.set_string(keys::UNREPORTED_SYSTEM_DATA, &json),
            Err(e) => warn!(error = %e, "Failed to serialize pending system data"),
        }
    }

    pub fn mark_system_data_reported(&self, hash: i64) {
        self.store.set_int(keys::REPORTED_SYSTEM_DATA_HASH, hash);
        self.store.remove(keys::UNREPORTED_SYSTEM_DATA);
    }

    pub fn report_system_info(&self) -> Option<bool> {
        self.store.get_bool(keys::REPORT_SYSTEM_INFO)
    }

    pub fn set_report_system_info(&self, enabled: bool) {
        self.store.set_bool(keys::REPORT_SYSTEM_INFO, enabled);
    }

    // === Last error ===

    pub fn record_error(&self, error: &SyncError) {
        self.store.set_string(keys::LAST_ERROR_CODE, error.code());
        self.store
            .set_string(keys::LAST_ERROR_MESSAGE, &error.to_string());
        self.store
            .set_int(keys::LAST_ERROR_AT, chrono::Utc::now().timestamp());
    }

    pub fn last_error(&self) -> Option<(String, String, i64)> {
        Some((
            self.store.get_string(keys::LAST_ERROR_CODE)?,
            self.store.get_string(keys::LAST_ERROR_MESSAGE).unwrap_or_default(),
            self.store.get_int(keys::LAST_ERROR_AT).unwrap_or_default(),
        ))
    }

    // === Lifecycle ===

    /// Drop the device identity and every reporting marker (e.g. on logout).
    ///
    /// The next sync starts over with a create.
    pub fn forget_identity(&self) {
        for key in [
            keys::PUSH_REGISTRATION_ID,
            keys::CLOUD_TOKEN_REPORTED,
            keys::REPORTED_CLOUD_TOKEN,
            keys::APPLICATION_USER_ID_REPORTED,
            keys::REPORTED_PUSH_SERVICE_TYPE,
            keys::PRIMARY_SETTING,
            keys::UNREPORTED_PRIMARY_SETTING,
            keys::CUSTOM_ATTRIBUTES,
            keys::UNREPORTED_CUSTOM_ATTRIBUTES,
            keys::REPORTED_SYSTEM_DATA_HASH,
            keys::UNREPORTED_SYSTEM_DATA,
        ] {
            self.store.remove(key);
        }
        debug!("Installation identity forgotten");
    }

    pub fn view(&self) -> SyncStateView {
        SyncStateView {
            push_registration_id: self.push_registration_id(),
            cloud_token_reported: self.cloud_token_reported(),
            reported_cloud_token: self.reported_cloud_token(),
            application_user_id: self.application_user_id(),
            application_user_id_reported: self.application_user_id_reported(),
            reported_push_service_type: self.reported_push_service_type(),
            primary_setting: self.primary_setting(),
            unreported_primary_setting: self.unreported_primary_setting(),
            push_registration_enabled: self.push_registration_enabled(),
            custom_attributes: self.custom_attributes(),
            unreported_custom_attributes: self.unreported_custom_attributes(),
            reported_system_data_hash: self.reported_system_data_hash(),
            unreported_system_data: self.unreported_system_data(),
            last_error_code: self.store.get_string(keys::LAST_ERROR_CODE),
        }
    }
}

impl std::fmt::Debug for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SyncState").field(&self.view()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomAttributeValue;
    use crate::store::MemoryStore;

    fn state() -> SyncState {
        SyncState::new(Arc::new(MemoryStore::new()))
    }

    fn attrs(pairs: &[(&str, &str)]) -> CustomAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CustomAttributeValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_defaults_for_fresh_state() {
        let view = state().view();
        assert!(view.push_registration_id.is_none());
        assert!(!view.cloud_token_reported);
        assert!(!view.application_user_id_reported);
        assert!(view.push_registration_enabled);
        assert!(view.unreported_primary_setting.is_none());
    }

    #[test]
    fn test_blank_registration_id_counts_as_missing() {
        let state = state();
        state.set_push_registration_id("  ");
        assert!(state.is_registration_unavailable());
    }

    #[test]
    fn test_custom_attribute_staging_and_commit() {
        let state = state();
        state.set_custom_attributes(attrs(&[("tier", "silver"), ("city", "Zagreb")]));

        state.stage_custom_attributes(attrs(&[("tier", "gold")]));
        let pending = state.stage_custom_attributes(attrs(&[("lang", "hr")]));
        assert_eq!(pending, attrs(&[("tier", "gold"), ("lang", "hr")]));

        state.commit_custom_attributes();
        assert!(state.unreported_custom_attributes().is_none());
        assert_eq!(
            state.custom_attributes().unwrap(),
            attrs(&[("tier", "gold"), ("city", "Zagreb"), ("lang", "hr")])
        );
    }

    #[test]
    fn test_set_application_user_id_marks_unreported() {
        let state = state();
        state.set_application_user_id_reported(true);
        state.set_application_user_id("user-1");
        assert_eq!(state.application_user_id().as_deref(), Some("user-1"));
        assert!(!state.application_user_id_reported());
    }

    #[test]
    fn test_forget_identity_clears_markers() {
        let state = state();
        state.set_push_registration_id("ID1");
        state.mark_cloud_token_reported("T1");
        state.set_application_user_id_reported(true);
        state.set_unreported_primary_setting(true);
        state.mark_system_data_reported(99);
        state.set_reported_push_service_type(PushServiceType::Firebase);

        state.forget_identity();

        let view = state.view();
        assert!(view.push_registration_id.is_none());
        assert!(!view.cloud_token_reported);
        assert!(view.reported_cloud_token.is_none());
        assert!(!view.application_user_id_reported);
        assert!(view.unreported_primary_setting.is_none());
        assert!(view.reported_system_data_hash.is_none());
        assert!(view.reported_push_service_type.is_none());
    }

    #[test]
    fn test_record_error() {
        let state = state();
        state.record_error(&SyncError::network("connection reset"));
        let (code, message, at) = state.last_error().unwrap();
        assert_eq!(code, "NETWORK_ERROR");
        assert!(message.contains("connection reset"));
        assert!(at > 0);
    }
}
