//! Scan workflow: resolve a decoded payload to device records and apply
//! status transitions with provenance.

use crate::store::{DeviceStore, MEMBERSHIP_LIMIT, StatusWrite, StoreError, VerificationWrite};
use models::device::{DeviceFilter, DeviceRecord, DeviceStatus, ToggleOutcome, VerificationOutcome};
use models::scan::{ScanCandidates, ScanResolution};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

pub mod route;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no device matches `{0}`")]
    NoDevice(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Looks up the records a set of candidates refers to. Serial numbers are
/// tried first; the registration number is only consulted when none of them
/// matched.
pub async fn resolve(
    store: &dyn DeviceStore,
    candidates: &ScanCandidates,
) -> Result<Vec<DeviceRecord>, StoreError> {
    let serial_numbers = &candidates.serial_numbers;

    let mut devices = if serial_numbers.len() <= MEMBERSHIP_LIMIT {
        store.find_by_serials(serial_numbers).await?
    } else {
        debug!(
            "{} candidates exceed the membership limit, scanning all devices",
            serial_numbers.len()
        );
        let wanted: HashSet<&str> = serial_numbers.iter().map(String::as_str).collect();
        let mut devices: Vec<DeviceRecord> = store
            .list_devices(&DeviceFilter::default())
            .await?
            .into_iter()
            .filter(|device| wanted.contains(device.serial_number.as_str()))
            .collect();
        devices.sort_by_key(|device| device.id);
        devices
    };

    if devices.is_empty() {
        if let Some(registration_number) = &candidates.registration_number {
            debug!("No serial number matched, falling back to registration number");
            devices = store.find_by_registration(registration_number).await?;
        }
    }

    Ok(devices)
}

pub async fn resolve_payload(
    store: &dyn DeviceStore,
    payload: &str,
) -> Result<ScanResolution, StoreError> {
    let candidates = ScanCandidates::interpret(payload);
    let devices = resolve(store, &candidates).await?;

    let outcome = if devices.is_empty() { "miss" } else { "match" };
    metrics::increment_counter!("scan_resolutions_total", "outcome" => outcome);

    Ok(ScanResolution {
        candidates,
        devices,
    })
}

/// Unconditional status write stamped with the actor, the last writer wins.
pub async fn apply_status(
    store: &dyn DeviceStore,
    device_id: i32,
    status: DeviceStatus,
    actor_id: i32,
) -> Result<DeviceRecord, StoreError> {
    let device = store
        .set_status(device_id, StatusWrite { status, actor_id })
        .await?;

    info!(
        device_id,
        actor_id,
        "Device {} is now {}",
        device.serial_number,
        device.status
    );
    metrics::increment_counter!("status_transitions_total", "status" => status.as_str());

    Ok(device)
}

/// Flips the status of the device a sticker refers to. The write only lands
/// if nobody else touched the record since it was read.
pub async fn toggle(
    store: &dyn DeviceStore,
    payload: &str,
    actor_id: i32,
) -> Result<ToggleOutcome, ScanError> {
    let candidates = ScanCandidates::interpret(payload);
    let devices = resolve(store, &candidates).await?;

    let Some(device) = devices.into_iter().next() else {
        return Err(ScanError::NoDevice(payload.to_owned()));
    };

    let previous = device.status;
    let write = StatusWrite {
        status: previous.flipped(),
        actor_id,
    };

    let device = store
        .set_status_if_version(device.id, write, device.version)
        .await
        .inspect_err(|err| {
            if matches!(err, StoreError::Conflict) {
                metrics::increment_counter!("toggle_conflicts_total");
            }
        })?;

    info!(
        device_id = device.id,
        actor_id,
        "Toggled {} from {} to {}",
        device.serial_number,
        previous,
        device.status
    );
    metrics::increment_counter!("status_transitions_total", "status" => device.status.as_str());

    Ok(ToggleOutcome { device, previous })
}

/// Compares the serial number read off the laptop with the record. A match
/// checks the device in and clears the mismatch flag, a mismatch raises the
/// flag and leaves the status alone.
pub async fn verify(
    store: &dyn DeviceStore,
    device_id: i32,
    observed_serial: &str,
    actor_id: i32,
) -> Result<VerificationOutcome, StoreError> {
    let device = store
        .get_device(device_id)
        .await?
        .ok_or(StoreError::NotFound)?;

    // exact, like the resolver: a serial that verifies must also resolve
    let observed_serial = observed_serial.trim();
    let is_match = observed_serial == device.serial_number;

    let device = store
        .apply_verification(
            device_id,
            VerificationWrite {
                status: is_match.then_some(DeviceStatus::InSchool),
                is_match,
                observed_serial: observed_serial.to_owned(),
                expected_serial: device.serial_number,
                actor_id,
            },
        )
        .await?;

    if !is_match {
        info!(
            device_id,
            actor_id, "Serial number mismatch, read `{observed_serial}`"
        );
    }
    metrics::increment_counter!(
        "verifications_total",
        "outcome" => if is_match { "match" } else { "mismatch" }
    );

    Ok(VerificationOutcome { device, is_match })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UserStore};
    use assert_matches::assert_matches;
    use models::device::NewDevice;

    async fn seeded(serials: &[&str]) -> (MemoryStore, i32) {
        let store = MemoryStore::new();
        let owner = store.create_user("student-1", None).await.unwrap();
        for serial in serials {
            store
                .insert_device(
                    owner.id,
                    "CS/042/2023",
                    &NewDevice {
                        serial_number: serial.to_string(),
                        model: None,
                    },
                )
                .await
                .unwrap();
        }
        (store, owner.id)
    }

    fn candidates(serials: &[String], registration_number: Option<&str>) -> ScanCandidates {
        ScanCandidates {
            serial_numbers: serials.to_vec(),
            registration_number: registration_number.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn test_small_candidate_set_uses_one_membership_query() {
        let (store, _) = seeded(&["A", "B", "C"]).await;
        let serials: Vec<String> = (0..10).map(|i| format!("SN{i}")).chain(["B".into()]).collect();

        let devices = resolve(&store, &candidates(&serials[1..], None)).await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(store.membership_queries(), 1);
        assert_eq!(store.full_scans(), 0);
    }

    #[tokio::test]
    async fn test_large_candidate_set_falls_back_to_full_scan() {
        let (store, _) = seeded(&["A", "B", "C", "D"]).await;
        let many: Vec<String> = ["A", "C"]
            .into_iter()
            .map(String::from)
            .chain((0..10).map(|i| format!("SN{i}")))
            .collect();
        let few: Vec<String> = vec!["A".into(), "C".into()];

        let scanned = resolve(&store, &candidates(&many, None)).await.unwrap();
        assert_eq!(store.membership_queries(), 0);
        assert_eq!(store.full_scans(), 1);

        let queried = resolve(&store, &candidates(&few, None)).await.unwrap();
        assert_eq!(store.membership_queries(), 1);
        assert_eq!(scanned, queried);
    }

    #[tokio::test]
    async fn test_registration_fallback_only_when_serials_miss() {
        let (store, _) = seeded(&["A", "B"]).await;

        let hit = resolve(&store, &candidates(&["A".into()], Some("CS/042/2023")))
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(store.registration_queries(), 0);

        let fallback = resolve(&store, &candidates(&["Z".into()], Some("CS/042/2023")))
            .await
            .unwrap();
        assert_eq!(fallback.len(), 2);
        assert_eq!(store.registration_queries(), 1);

        let miss = resolve(&store, &candidates(&["Z".into()], None)).await.unwrap();
        assert!(miss.is_empty());
        assert_eq!(store.registration_queries(), 1);
    }

    #[tokio::test]
    async fn test_register_scan_check_in_and_out() {
        let (store, _) = seeded(&["X1"]).await;
        let guard = store.create_user("guard-1", None).await.unwrap();

        let resolution = resolve_payload(&store, "X1").await.unwrap();
        assert_eq!(resolution.devices.len(), 1);
        let device = &resolution.devices[0];

        let checked_in = apply_status(&store, device.id, DeviceStatus::InSchool, guard.id)
            .await
            .unwrap();
        assert_eq!(checked_in.status, DeviceStatus::InSchool);
        assert_eq!(checked_in.last_scanned_by, Some(guard.id));
        let first_stamp = checked_in.last_verified_at.unwrap();

        let rescanned = resolve_payload(&store, "X1").await.unwrap();
        let checked_out =
            apply_status(&store, rescanned.devices[0].id, DeviceStatus::OutSchool, guard.id)
                .await
                .unwrap();
        assert_eq!(checked_out.status, DeviceStatus::OutSchool);
        assert!(checked_out.last_verified_at.unwrap() > first_stamp);
    }

    #[tokio::test]
    async fn test_toggle_flips_status() {
        let (store, actor_id) = seeded(&["X1"]).await;

        let outcome = toggle(&store, "X1", actor_id).await.unwrap();
        assert_eq!(outcome.previous, DeviceStatus::OutSchool);
        assert_eq!(outcome.device.status, DeviceStatus::InSchool);

        let outcome = toggle(&store, "X1", actor_id).await.unwrap();
        assert_eq!(outcome.device.status, DeviceStatus::OutSchool);
        assert_eq!(store.status_writes(), 2);
    }

    #[tokio::test]
    async fn test_toggle_unknown_sticker() {
        let (store, actor_id) = seeded(&["X1"]).await;
        let err = toggle(&store, "nope", actor_id).await.unwrap_err();
        assert_matches!(err, ScanError::NoDevice(payload) if payload == "nope");
    }

    #[tokio::test]
    async fn test_toggle_with_stale_version_conflicts() {
        let (store, actor_id) = seeded(&["X1"]).await;
        let device = resolve_payload(&store, "X1").await.unwrap().devices.remove(0);

        // another operator wins the race after our read
        apply_status(&store, device.id, DeviceStatus::InSchool, actor_id)
            .await
            .unwrap();

        let write = StatusWrite {
            status: device.status.flipped(),
            actor_id,
        };
        let err = store
            .set_status_if_version(device.id, write, device.version)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Conflict);
    }

    #[tokio::test]
    async fn test_verify_mismatch_raises_flag_and_keeps_status() {
        let (store, actor_id) = seeded(&["X1"]).await;

        let outcome = verify(&store, 1, "X2", actor_id).await.unwrap();
        assert!(!outcome.is_match);
        assert!(outcome.device.sn_mismatch);
        assert_eq!(outcome.device.status, DeviceStatus::OutSchool);
        assert_eq!(outcome.device.last_scanned_by, Some(actor_id));

        let outcome = verify(&store, 1, " X1 ", actor_id).await.unwrap();
        assert!(outcome.is_match);
        assert!(!outcome.device.sn_mismatch);
        assert_eq!(outcome.device.status, DeviceStatus::InSchool);

        let log = store.verification_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].scanned_serial, "X2");
        assert_eq!(log[0].expected_serial, "X1");
    }

    #[tokio::test]
    async fn test_verify_is_case_sensitive_like_the_resolver() {
        let (store, actor_id) = seeded(&["X1"]).await;

        let outcome = verify(&store, 1, "x1", actor_id).await.unwrap();
        assert!(!outcome.is_match);
        assert!(outcome.device.sn_mismatch);
        let resolution = resolve_payload(&store, "x1").await.unwrap();
        assert!(resolution.devices.is_empty());
    }

    #[tokio::test]
    async fn test_verify_unknown_device() {
        let (store, actor_id) = seeded(&[]).await;
        let err = verify(&store, 42, "X1", actor_id).await.unwrap_err();
        assert_matches!(err, StoreError::NotFound);
    }
}
