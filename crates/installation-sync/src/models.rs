//! Core data models for installation synchronization

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Custom attributes keyed by attribute name
pub type CustomAttributes = BTreeMap<String, CustomAttributeValue>;

/// Push transport used to deliver notifications to this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PushServiceType {
    Firebase,
    Huawei,
    #[serde(rename = "APNS")]
    Apns,
}

impl PushServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushServiceType::Firebase => "Firebase",
            PushServiceType::Huawei => "Huawei",
            PushServiceType::Apns => "APNS",
        }
    }
}

impl fmt::Display for PushServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Firebase" => Ok(PushServiceType::Firebase),
            "Huawei" => Ok(PushServiceType::Huawei),
            "APNS" => Ok(PushServiceType::Apns),
            other => Err(format!("unknown push service type: {}", other)),
        }
    }
}

/// Value of a single custom attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomAttributeValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl From<&str> for CustomAttributeValue {
    fn from(value: &str) -> Self {
        CustomAttributeValue::String(value.to_string())
    }
}

impl From<String> for CustomAttributeValue {
    fn from(value: String) -> Self {
        CustomAttributeValue::String(value)
    }
}

impl From<f64> for CustomAttributeValue {
    fn from(value: f64) -> Self {
        CustomAttributeValue::Number(value)
    }
}

impl From<bool> for CustomAttributeValue {
    fn from(value: bool) -> Self {
        CustomAttributeValue::Boolean(value)
    }
}

/// Environment-derived metadata reported alongside the installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub sdk_version: String,
    pub os_version: String,
    pub device_manufacturer: String,
    pub device_model: String,
    pub app_version: String,
    pub geofencing_enabled: bool,
    pub notifications_enabled: bool,
    pub device_secure: bool,
    pub os_language: String,
    pub device_name: String,
    pub os: String,
}

impl SystemSnapshot {
    /// Apply the "report system info" privacy toggle.
    ///
    /// With reporting disabled, device-identifying fields are blanked. The SDK
    /// version, OS identifier and the geofencing/notification flags are
    /// always reported.
    pub fn masked(&self, report_system_info: bool) -> SystemSnapshot {
        if report_system_info {
            return self.clone();
        }

        SystemSnapshot {
            sdk_version: self.sdk_version.clone(),
            os_version: String::new(),
            device_manufacturer: String::new(),
            device_model: String::new(),
            app_version: String::new(),
            geofencing_enabled: self.geofencing_enabled,
            notifications_enabled: self.notifications_enabled,
            device_secure: false,
            os_language: String::new(),
            device_name: String::new(),
            os: self.os.clone(),
        }
    }

    /// Stable hash of the snapshot, comparable across process restarts
    pub fn data_hash(&self) -> i64 {
        // Field order of the derived serializer is fixed, so the JSON form is canonical
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

/// Current device state as seen by the platform layer
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub system: SystemSnapshot,
    pub push_token: Option<String>,
    pub push_service_type: PushServiceType,
}

/// Registry-facing record describing one device's push/identity configuration.
///
/// Used both as the remote record returned by the registry and as a delta.
/// In a delta every `None` field means "no change", never "clear".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_registration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_service_type: Option<PushServiceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_service_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<CustomAttributes>,
    #[serde(rename = "regEnabled", skip_serializing_if = "Option::is_none")]
    pub registration_enabled: Option<bool>,
    #[serde(flatten)]
    pub system_data: Option<SystemSnapshot>,
}

impl Installation {
    /// Empty delta addressed to a specific registration id
    pub fn targeting(push_registration_id: impl Into<String>) -> Self {
        Self {
            push_registration_id: Some(push_registration_id.into()),
            ..Default::default()
        }
    }

    /// Whether this delta carries anything worth sending.
    ///
    /// `registration_enabled` only ever accompanies other changes and the
    /// registration id is an address, so neither counts.
    pub fn has_data_to_report(&self) -> bool {
        self.push_service_type.is_some()
            || self.push_service_token.is_some()
            || self.primary.is_some()
            || self.application_user_id.is_some()
            || self.custom_attributes.is_some()
            || self.system_data.is_some()
    }
}
