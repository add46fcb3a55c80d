//! Change detection
//!
//! Compares the current device snapshot with what was last acknowledged by
//! the registry and produces the minimal delta that still needs reporting.

use super::state::SyncState;
use crate::models::{DeviceSnapshot, Installation};
use tracing::debug;

/// Fields that differ from the last reported state
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelta {
    pub installation: Installation,
    /// Hash of the system data carried by `installation`, if any
    pub system_data_hash: Option<i64>,
}

impl PendingDelta {
    /// A token is carried only when it is present and unreported
    pub fn carries_push_token(&self) -> bool {
        self.installation.push_service_token.is_some()
    }
}

/// Builds pending deltas from device snapshots and persisted progress
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    report_system_info_default: bool,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ChangeDetector {
    pub fn new(report_system_info_default: bool) -> Self {
        Self {
            report_system_info_default,
        }
    }

    /// Build the delta for the next exchange, or `None` when nothing changed.
    ///
    /// Changed system data is staged in the store right away so it survives a
    /// failed exchange; the commit step records its hash.
    pub fn build_pending_delta(
        &self,
        current: &DeviceSnapshot,
        state: &SyncState,
    ) -> Option<PendingDelta> {
        let mut installation = Installation::default();
        let mut system_data_hash = None;

        let report_system_info = state
            .report_system_info()
            .unwrap_or(self.report_system_info_default);
        let system = current.system.masked(report_system_info);
        let hash = system.data_hash();
        if state.reported_system_data_hash() != Some(hash) {
            state.stage_system_data(&system);
            installation.system_data = Some(system);
            system_data_hash = Some(hash);
        }

        if let Some(token) = unreported_token(current, state) {
            installation.push_service_token = Some(token);
        }

        if state.reported_push_service_type() != Some(current.push_service_type) {
            installation.push_service_type = Some(current.push_service_type);
        }

        if let Some(primary) = state.unreported_primary_setting() {
            installation.primary = Some(primary);
        }

        if !state.application_user_id_reported() {
            installation.application_user_id = state.application_user_id();
        }

        if let Some(pending) = state.unreported_custom_attributes() {
            installation.custom_attributes = Some(pending);
        }

        if !installation.has_data_to_report() {
            return None;
        }

        installation.registration_enabled = Some(state.push_registration_enabled());

        debug!(
            system_data = installation.system_data.is_some(),
            push_token = installation.push_service_token.is_some(),
            push_service_type = installation.push_service_type.is_some(),
            primary = ?installation.primary,
            application_user_id = installation.application_user_id.is_some(),
            custom_attributes = installation.custom_attributes.is_some(),
            "Built pending installation delta"
        );

        Some(PendingDelta {
            installation,
            system_data_hash,
        })
    }
}

/// The current token, when it is non-blank and not yet acknowledged
fn unreported_token(current: &DeviceSnapshot, state: &SyncState) -> Option<String> {
    let token = current
        .push_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())?;

    let acknowledged =
        state.cloud_token_reported() && state.reported_cloud_token().as_deref() == Some(token);
    if acknowledged {
        None
    } else {
        Some(token.to_string())
    }
}
