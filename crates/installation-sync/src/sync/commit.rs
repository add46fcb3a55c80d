//! Two-phase bookkeeping of reported markers
//!
//! A delta is staged before the registry call; once the exchange settles the
//! staged report is either committed or rolled back against [`SyncState`].

use super::state::SyncState;
use crate::error::SyncError;
use crate::models::{Installation, PushServiceType};
use tracing::debug;

/// Which identity a delta was applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTarget {
    /// The device running the synchronizer
    OwnDevice,
    /// Another installation of the same user, addressed explicitly
    OtherDevice,
}

/// True when `delta` carries no target identity or targets `local_id`
pub fn is_own_device(delta: &Installation, local_id: Option<&str>) -> bool {
    match delta.push_registration_id.as_deref() {
        None => true,
        Some(target) => local_id == Some(target),
    }
}

/// Markers a delta will acknowledge once the registry accepts it
#[derive(Debug, Clone, PartialEq)]
pub struct StagedReport {
    target: ReportTarget,
    push_token: Option<String>,
    push_service_type: Option<PushServiceType>,
    application_user_id: bool,
    primary: Option<bool>,
    registration_enabled: Option<bool>,
    custom_attributes: bool,
    system_data_hash: Option<i64>,
}

impl StagedReport {
    pub fn stage(delta: &Installation, system_data_hash: Option<i64>, target: ReportTarget) -> Self {
        Self {
            target,
            push_token: delta.push_service_token.clone(),
            push_service_type: delta.push_service_type,
            application_user_id: delta.application_user_id.is_some(),
            primary: delta.primary,
            registration_enabled: delta.registration_enabled,
            custom_attributes: delta.custom_attributes.is_some(),
            system_data_hash: system_data_hash.filter(|_| delta.system_data.is_some()),
        }
    }

    pub fn target(&self) -> ReportTarget {
        self.target
    }

    /// Apply the markers after the registry accepted the delta
    pub fn commit(&self, state: &SyncState) {
        state.store().batch(&mut || self.apply(state));
    }

    fn apply(&self, state: &SyncState) {
        if self.target == ReportTarget::OtherDevice {
            // Another device became the subject of the change; this one is demoted
            state.clear_unreported_primary_setting();
            state.set_primary_setting(false);
            debug!("Committed foreign installation update, local device demoted");
            return;
        }

        if let Some(primary) = self.primary {
            state.set_primary_setting(primary);
            state.clear_unreported_primary_setting();
        }
        if let Some(enabled) = self.registration_enabled {
            state.set_push_registration_enabled(enabled);
        }
        if let Some(token) = &self.push_token {
            state.mark_cloud_token_reported(token);
        }
        if self.application_user_id {
            state.set_application_user_id_reported(true);
        }
        if self.custom_attributes {
            state.commit_custom_attributes();
        }
        if let Some(hash) = self.system_data_hash {
            state.mark_system_data_reported(hash);
        }
        if let Some(ty) = self.push_service_type {
            state.set_reported_push_service_type(ty);
        }

        debug!(
            push_token = self.push_token.is_some(),
            application_user_id = self.application_user_id,
            custom_attributes = self.custom_attributes,
            system_data = self.system_data_hash.is_some(),
            "Committed reported installation markers"
        );
    }

    /// Undo after a failed exchange; every other marker stays pending
    pub fn rollback(&self, state: &SyncState, error: &SyncError) {
        state.set_cloud_token_reported(false);
        state.record_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomAttributeValue, CustomAttributes, SystemSnapshot};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn state() -> SyncState {
        SyncState::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_is_own_device() {
        let untargeted = Installation::default();
        assert!(is_own_device(&untargeted, Some("ID1")));
        assert!(is_own_device(&untargeted, None));

        assert!(is_own_device(&Installation::targeting("ID1"), Some("ID1")));
        assert!(!is_own_device(&Installation::targeting("ID2"), Some("ID1")));
        assert!(!is_own_device(&Installation::targeting("ID2"), None));
    }

    #[test]
    fn test_own_device_commit_applies_carried_markers() {
        let state = state();
        let mut attrs = CustomAttributes::new();
        attrs.insert("tier".to_string(), CustomAttributeValue::from("gold"));
        state.stage_custom_attributes(attrs.clone());
        state.set_unreported_primary_setting(true);
        state.set_application_user_id("user-1");

        let delta = Installation {
            push_service_token: Some("T1".to_string()),
            push_service_type: Some(PushServiceType::Huawei),
            primary: Some(true),
            application_user_id: Some("user-1".to_string()),
            custom_attributes: Some(attrs.clone()),
            registration_enabled: Some(true),
            system_data: Some(SystemSnapshot::default()),
            ..Default::default()
        };
        let staged = StagedReport::stage(&delta, Some(77), ReportTarget::OwnDevice);
        staged.commit(&state);

        let view = state.view();
        assert!(view.cloud_token_reported);
        assert_eq!(view.reported_cloud_token.as_deref(), Some("T1"));
        assert_eq!(view.reported_push_service_type, Some(PushServiceType::Huawei));
        assert_eq!(view.primary_setting, Some(true));
        assert!(view.unreported_primary_setting.is_none());
        assert!(view.application_user_id_reported);
        assert_eq!(view.custom_attributes, Some(attrs));
        assert!(view.unreported_custom_attributes.is_none());
        assert_eq!(view.reported_system_data_hash, Some(77));
    }

    #[test]
    fn test_other_device_commit_only_demotes() {
        let state = state();
        state.set_unreported_primary_setting(true);
        state.set_primary_setting(true);
        state.set_application_user_id("user-1");
        let mut attrs = CustomAttributes::new();
        attrs.insert("tier".to_string(), CustomAttributeValue::from("gold"));
        state.stage_custom_attributes(attrs.clone());
        state.mark_system_data_reported(11);
        state.stage_system_data(&SystemSnapshot::default());

        let mut delta = Installation::targeting("ID2");
        delta.primary = Some(true);
        let staged = StagedReport::stage(&delta, Some(99), ReportTarget::OtherDevice);
        staged.commit(&state);

        let view = state.view();
        assert!(view.unreported_primary_setting.is_none());
        assert_eq!(view.primary_setting, Some(false));
        assert!(!view.application_user_id_reported);
        assert!(!view.cloud_token_reported);
        assert_eq!(view.unreported_custom_attributes, Some(attrs));
        assert!(view.custom_attributes.is_none());
        assert_eq!(view.reported_system_data_hash, Some(11));
        assert!(view.unreported_system_data.is_some());
    }

    #[test]
    fn test_own_device_commit_keeps_uncarried_primary_pending() {
        let state = state();
        state.set_unreported_primary_setting(true);

        let delta = Installation {
            application_user_id: Some("user-1".to_string()),
            ..Default::default()
        };
        StagedReport::stage(&delta, None, ReportTarget::OwnDevice).commit(&state);

        let view = state.view();
        assert!(view.application_user_id_reported);
        assert_eq!(view.unreported_primary_setting, Some(true));
        assert!(view.primary_setting.is_none());
    }

    #[test]
    fn test_rollback_resets_token_flag_only() {
        let state = state();
        state.mark_cloud_token_reported("T1");
        state.set_unreported_primary_setting(false);

        let delta = Installation {
            primary: Some(false),
            ..Default::default()
        };
        let staged = StagedReport::stage(&delta, None, ReportTarget::OwnDevice);
        staged.rollback(&state, &SyncError::network("offline"));

        let view = state.view();
        assert!(!view.cloud_token_reported);
        assert_eq!(view.unreported_primary_setting, Some(false));
        assert_eq!(view.last_error_code.as_deref(), Some("NETWORK_ERROR"));
    }
}
