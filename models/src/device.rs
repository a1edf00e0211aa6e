use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Lifecycle status of a registered device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "device_status", rename_all = "snake_case")]
pub enum DeviceStatus {
    InSchool,
    OutSchool,
}

impl DeviceStatus {
    pub fn flipped(self) -> Self {
        match self {
            DeviceStatus::InSchool => DeviceStatus::OutSchool,
            DeviceStatus::OutSchool => DeviceStatus::InSchool,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::InSchool => "in_school",
            DeviceStatus::OutSchool => "out_school",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown device status `{}`", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for DeviceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_school" | "in" => Ok(DeviceStatus::InSchool),
            // `out_of_school` was written by older registration forms
            "out_school" | "out_of_school" | "out" => Ok(DeviceStatus::OutSchool),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct DeviceRecord {
    pub id: i32,
    pub serial_number: String,
    pub model: Option<String>,
    pub owner_id: i32,
    /// Copied from the owner's profile when the device is registered.
    pub registration_number: String,
    pub status: DeviceStatus,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub last_scanned_by: Option<i32>,
    pub sn_mismatch: bool,
    pub created_on: DateTime<Utc>,
    /// Bumped on every write, used by the conditional toggle.
    pub version: i32,
}

/// Query filter for device listing and snapshot subscriptions.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeviceFilter {
    pub status: Option<DeviceStatus>,
    /// Only devices whose mismatch flag equals this value.
    pub mismatch: Option<bool>,
    /// Case-insensitive substring of the registration number.
    pub registration_number: Option<String>,
    pub owner_id: Option<i32>,
}

impl DeviceFilter {
    pub fn in_school() -> Self {
        Self {
            status: Some(DeviceStatus::InSchool),
            ..Default::default()
        }
    }

    pub fn matches(&self, device: &DeviceRecord) -> bool {
        if let Some(status) = self.status {
            if device.status != status {
                return false;
            }
        }

        if let Some(mismatch) = self.mismatch {
            if device.sn_mismatch != mismatch {
                return false;
            }
        }

        if let Some(owner_id) = self.owner_id {
            if device.owner_id != owner_id {
                return false;
            }
        }

        match self.registration_number.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => device
                .registration_number
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewDevice {
    pub serial_number: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyRequest {
    /// Serial number the guard reads off the laptop itself.
    pub observed_serial: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerificationOutcome {
    pub device: DeviceRecord,
    pub is_match: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToggleOutcome {
    pub device: DeviceRecord,
    pub previous: DeviceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Sticker {
    pub device_id: i32,
    /// Text to encode on the adhesive label, the bare serial number.
    pub payload: String,
}
