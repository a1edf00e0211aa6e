use crate::store::{DeviceStore, StoreError};
use models::device::{DeviceFilter, DeviceRecord, NewDevice, Sticker};
use models::scan::{GateCode, ScanEnvelope};
use models::user::User;
use thiserror::Error;
use tracing::{info, warn};

pub mod route;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("serial number must not be empty")]
    MissingSerial,
    #[error("set a registration number on your profile before registering devices")]
    MissingRegistrationNumber,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Serial numbers typed in or read off a label often carry padding and
/// trailing NULs.
fn normalize_serial(serial_number: &str) -> &str {
    serial_number.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// Registers a device for `owner`, copying the owner's registration number
/// onto the record. Duplicate serial numbers are logged, not refused.
pub async fn register_device(
    store: &dyn DeviceStore,
    owner: &User,
    device: NewDevice,
) -> Result<DeviceRecord, RegistrationError> {
    let registration_number = owner
        .registration_number
        .as_deref()
        .map(str::trim)
        .filter(|reg| !reg.is_empty())
        .ok_or(RegistrationError::MissingRegistrationNumber)?;

    let serial_number = normalize_serial(&device.serial_number);
    if serial_number.is_empty() {
        return Err(RegistrationError::MissingSerial);
    }

    let existing = store.find_by_serial(serial_number).await?;
    if !existing.is_empty() {
        warn!(
            "Serial number {serial_number} is already registered on {} device(s)",
            existing.len()
        );
    }

    let device = NewDevice {
        serial_number: serial_number.to_owned(),
        model: device
            .model
            .map(|model| model.trim().to_owned())
            .filter(|model| !model.is_empty()),
    };

    let record = store
        .insert_device(owner.id, registration_number, &device)
        .await?;
    info!(
        device_id = record.id,
        owner_id = owner.id,
        "Registered device {}",
        record.serial_number
    );

    Ok(record)
}

pub async fn owned_devices(
    store: &dyn DeviceStore,
    owner_id: i32,
) -> Result<Vec<DeviceRecord>, StoreError> {
    store
        .list_devices(&DeviceFilter {
            owner_id: Some(owner_id),
            ..Default::default()
        })
        .await
}

pub fn gate_code(owner: &User, devices: &[DeviceRecord]) -> serde_json::Result<GateCode> {
    let envelope = ScanEnvelope::for_owner(owner.registration_number.clone(), devices);
    Ok(GateCode {
        payload: envelope.encode()?,
        device_count: devices.len(),
    })
}

pub fn sticker(device: &DeviceRecord) -> Sticker {
    Sticker {
        device_id: device.id,
        payload: device.serial_number.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UserStore};
    use assert_matches::assert_matches;
    use models::scan::ScanCandidates;
    use models::user::UpdateProfile;

    async fn student(store: &MemoryStore, registration_number: Option<&str>) -> User {
        let user = store.create_user("student-1", None).await.unwrap();
        store
            .update_profile(
                user.id,
                &UpdateProfile {
                    registration_number: registration_number.map(str::to_owned),
                    location_id: None,
                },
            )
            .await
            .unwrap()
    }

    fn new_device(serial_number: &str, model: Option<&str>) -> NewDevice {
        NewDevice {
            serial_number: serial_number.into(),
            model: model.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn test_register_copies_registration_number() {
        let store = MemoryStore::new();
        let owner = student(&store, Some("CS/042/2023")).await;

        let device = register_device(&store, &owner, new_device(" X1\0\0", Some("  ")))
            .await
            .unwrap();

        assert_eq!(device.serial_number, "X1");
        assert_eq!(device.model, None);
        assert_eq!(device.registration_number, "CS/042/2023");
        assert_eq!(device.owner_id, owner.id);
        assert!(!device.sn_mismatch);
        assert_eq!(device.last_verified_at, None);
    }

    #[tokio::test]
    async fn test_register_requires_profile_and_serial() {
        let store = MemoryStore::new();
        let owner = student(&store, None).await;
        let err = register_device(&store, &owner, new_device("X1", None))
            .await
            .unwrap_err();
        assert_matches!(err, RegistrationError::MissingRegistrationNumber);

        let owner = student(&store, Some("R1")).await;
        let err = register_device(&store, &owner, new_device(" \0", None))
            .await
            .unwrap_err();
        assert_matches!(err, RegistrationError::MissingSerial);
    }

    #[tokio::test]
    async fn test_duplicate_serials_are_allowed() {
        let store = MemoryStore::new();
        let owner = student(&store, Some("R1")).await;
        register_device(&store, &owner, new_device("X1", None)).await.unwrap();
        register_device(&store, &owner, new_device("X1", None)).await.unwrap();

        assert_eq!(store.find_by_serial("X1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gate_code_lists_owned_devices() {
        let store = MemoryStore::new();
        let owner = student(&store, Some("R1")).await;
        register_device(&store, &owner, new_device("A", None)).await.unwrap();
        register_device(&store, &owner, new_device("B", Some("ThinkPad"))).await.unwrap();

        let devices = owned_devices(&store, owner.id).await.unwrap();
        let code = gate_code(&owner, &devices).unwrap();
        assert_eq!(code.device_count, 2);

        let candidates = ScanCandidates::interpret(&code.payload);
        let mut serials = candidates.serial_numbers;
        serials.sort();
        assert_eq!(serials, vec!["A", "B"]);
        assert_eq!(candidates.registration_number.as_deref(), Some("R1"));
    }
}
