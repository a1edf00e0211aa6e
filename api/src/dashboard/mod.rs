use crate::store::{DeviceStore, StoreError, UserStore};
use crate::users;
use chrono::Utc;
use models::dashboard::Dashboard;
use models::device::{DeviceFilter, DeviceStatus};
use models::user::Role;
use std::time::Duration;

pub mod route;

pub async fn build(
    devices: &dyn DeviceStore,
    users: &dyn UserStore,
    active_window: Duration,
) -> Result<Dashboard, StoreError> {
    let total_count = devices.count_devices(&DeviceFilter::default()).await?;
    let in_school_count = devices.count_devices(&DeviceFilter::in_school()).await?;
    let out_school_count = devices
        .count_devices(&DeviceFilter {
            status: Some(DeviceStatus::OutSchool),
            ..Default::default()
        })
        .await?;
    let mismatch_count = devices
        .count_devices(&DeviceFilter {
            mismatch: Some(true),
            ..Default::default()
        })
        .await?;

    let now = Utc::now();
    let active_security_count = users
        .list_by_role(Role::Security)
        .await?
        .into_iter()
        .filter(|user| users::is_active(user.last_active, now, active_window))
        .count() as u32;

    Ok(Dashboard {
        total_count,
        in_school_count,
        out_school_count,
        mismatch_count,
        active_security_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan;
    use crate::store::MemoryStore;
    use models::device::NewDevice;

    #[tokio::test]
    async fn test_dashboard_counts() {
        let store = MemoryStore::new();
        let owner = store.create_user("student-1", None).await.unwrap();
        for serial in ["A", "B", "C"] {
            store
                .insert_device(
                    owner.id,
                    "R1",
                    &NewDevice {
                        serial_number: serial.into(),
                        model: None,
                    },
                )
                .await
                .unwrap();
        }

        let guard = store.create_user("guard-1", None).await.unwrap();
        store.set_role(guard.id, Role::Security).await.unwrap();
        store.touch(guard.id).await.unwrap();
        let idle = store.create_user("guard-2", None).await.unwrap();
        store.set_role(idle.id, Role::Security).await.unwrap();

        scan::apply_status(&store, 1, DeviceStatus::InSchool, guard.id)
            .await
            .unwrap();
        scan::verify(&store, 2, "WRONG", guard.id).await.unwrap();

        let dashboard = build(&store, &store, Duration::from_secs(300)).await.unwrap();
        assert_eq!(
            dashboard,
            Dashboard {
                total_count: 3,
                in_school_count: 1,
                out_school_count: 2,
                mismatch_count: 1,
                active_security_count: 1,
            }
        );
    }
}
